//! Per-channel first-order DC blocker.
//!
//! `y[n] = x[n] - x[n-1] + R * y[n-1]` with the pole `R` shared across all
//! eight channels.

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, PortDef, Ports};

const CHANNELS: usize = 8;

#[derive(Default, Clone, Copy)]
struct DcState {
    xm1: f32,
    ym1: f32,
}

struct DcBlock {
    state: [DcState; CHANNELS],
}

impl Instance for DcBlock {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let r = ports.control[0];
        for c in 0..CHANNELS {
            let Some(input) = ports.audio_in[c] else {
                continue;
            };
            let Some(out) = ports.audio_out[c].as_deref_mut() else {
                continue;
            };
            let mut s = self.state[c];
            for (o, &x) in out[..n_samples].iter_mut().zip(input) {
                let y = x - s.xm1 + r * s.ym1;
                s.xm1 = x;
                s.ym1 = y;
                *o = y;
            }
            self.state[c] = s;
        }
    }
}

static DCBLOCK_PORTS: &[PortDef] = &[
    PortDef::audio_in(0, "In 1"),
    PortDef::audio_in(1, "In 2"),
    PortDef::audio_in(2, "In 3"),
    PortDef::audio_in(3, "In 4"),
    PortDef::audio_in(4, "In 5"),
    PortDef::audio_in(5, "In 6"),
    PortDef::audio_in(6, "In 7"),
    PortDef::audio_in(7, "In 8"),
    PortDef::audio_out(8, "Out 1"),
    PortDef::audio_out(9, "Out 2"),
    PortDef::audio_out(10, "Out 3"),
    PortDef::audio_out(11, "Out 4"),
    PortDef::audio_out(12, "Out 5"),
    PortDef::audio_out(13, "Out 6"),
    PortDef::audio_out(14, "Out 7"),
    PortDef::audio_out(15, "Out 8"),
    PortDef::control_in(16, "R", 0.995, 0.0, 1.0),
];

pub(crate) static DCBLOCK: Desc = Desc {
    name: "dcblock",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: DCBLOCK_PORTS,
    make: |_| {
        Ok(Box::new(DcBlock {
            state: [DcState::default(); CHANNELS],
        }))
    },
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{InstantiateCtx, Plugin};

    #[test]
    fn removes_dc_offset() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("dcblock").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(48_000, 0, None))
            .unwrap();

        let input = vec![1.0f32; 48_000];
        let mut out = vec![0.0f32; 48_000];
        {
            let mut audio_in: Vec<Option<&[f32]>> = vec![None; 8];
            audio_in[0] = Some(&input);
            let mut slots: Vec<Option<&mut [f32]>> = Vec::new();
            slots.push(Some(out.as_mut_slice()));
            for _ in 1..8 {
                slots.push(None);
            }
            let mut notify: [f32; 0] = [];
            let mut ports = Ports {
                audio_in: &audio_in,
                audio_out: &mut slots,
                control: &[0.995],
                notify: &mut notify,
            };
            inst.run(&mut ports, 48_000);
        }
        // constant input decays toward zero
        assert!(out[0] == 1.0);
        assert!(out[47_999].abs() < 1e-3);
    }
}
