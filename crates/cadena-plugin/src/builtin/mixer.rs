//! Eight-input mixer with per-input gains.
//!
//! Unconnected inputs and zero-gain inputs are skipped entirely. When all
//! remaining gains are equal the kernel takes the shared-gain fast path
//! (sum first, scale once).

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, PortDef, Ports};

struct Mixer {
    dsp: cadena_dsp::Dsp,
}

impl Instance for Mixer {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let Some(out) = ports.audio_out[0].as_deref_mut() else {
            return;
        };

        let mut srcs: [&[f32]; 8] = [&[]; 8];
        let mut gains = [0.0f32; 8];
        let mut n_src = 0;
        let mut eq_gain = true;

        for (slot, &gain) in ports.audio_in.iter().zip(ports.control) {
            let Some(input) = slot else { continue };
            if gain == 0.0 {
                continue;
            }
            srcs[n_src] = &input[..n_samples];
            gains[n_src] = gain;
            if gain != gains[0] {
                eq_gain = false;
            }
            n_src += 1;
        }

        let n_gain = if eq_gain { 1.min(n_src) } else { n_src };
        self.dsp
            .mix_gain(&mut out[..n_samples], &srcs[..n_src], &gains[..n_gain]);
    }
}

static MIXER_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In 1"),
    PortDef::audio_in(2, "In 2"),
    PortDef::audio_in(3, "In 3"),
    PortDef::audio_in(4, "In 4"),
    PortDef::audio_in(5, "In 5"),
    PortDef::audio_in(6, "In 6"),
    PortDef::audio_in(7, "In 7"),
    PortDef::audio_in(8, "In 8"),
    PortDef::control_in(9, "Gain 1", 1.0, 0.0, 10.0),
    PortDef::control_in(10, "Gain 2", 1.0, 0.0, 10.0),
    PortDef::control_in(11, "Gain 3", 1.0, 0.0, 10.0),
    PortDef::control_in(12, "Gain 4", 1.0, 0.0, 10.0),
    PortDef::control_in(13, "Gain 5", 1.0, 0.0, 10.0),
    PortDef::control_in(14, "Gain 6", 1.0, 0.0, 10.0),
    PortDef::control_in(15, "Gain 7", 1.0, 0.0, 10.0),
    PortDef::control_in(16, "Gain 8", 1.0, 0.0, 10.0),
];

pub(crate) static MIXER: Desc = Desc {
    name: "mixer",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: MIXER_PORTS,
    make: |ctx| Ok(Box::new(Mixer { dsp: ctx.dsp })),
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::BuiltinPlugin;
    use crate::descriptor::{InstantiateCtx, Plugin};

    fn run_mixer(
        ins: &[Option<&[f32]>],
        gains: &[f32],
        n: usize,
    ) -> Vec<f32> {
        let plugin = BuiltinPlugin::new();
        let desc = plugin.make_descriptor("mixer").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(48_000, 0, None))
            .unwrap();

        let mut out = vec![0.0f32; n];
        let mut audio_in: Vec<Option<&[f32]>> = ins.to_vec();
        audio_in.resize(8, None);
        let mut control = gains.to_vec();
        control.resize(8, 1.0);

        {
            let mut out_slot: Option<&mut [f32]> = Some(&mut out);
            let outs = std::slice::from_mut(&mut out_slot);
            let mut notify: [f32; 0] = [];
            let mut ports = Ports {
                audio_in: &audio_in,
                audio_out: outs,
                control: &control,
                notify: &mut notify,
            };
            inst.run(&mut ports, n);
        }
        out
    }

    #[test]
    fn two_inputs_with_gains() {
        let a = [1.0f32; 4];
        let b = [2.0f32; 4];
        let out = run_mixer(&[Some(&a), Some(&b)], &[0.5, 0.25], 4);
        assert_eq!(out, vec![1.0; 4]);
    }

    #[test]
    fn no_inputs_produces_silence() {
        let out = run_mixer(&[], &[], 8);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn equal_gains_match_per_source_path() {
        let a: Vec<f32> = (0..16).map(|i| i as f32 * 0.1).collect();
        let b: Vec<f32> = (0..16).map(|i| (15 - i) as f32 * 0.1).collect();
        let shared = run_mixer(&[Some(&a), Some(&b)], &[0.5, 0.5], 16);
        // direct sum reference
        for (i, v) in shared.iter().enumerate() {
            let want = (a[i] + b[i]) * 0.5;
            assert!((v - want).abs() < 1e-6);
        }
    }
}
