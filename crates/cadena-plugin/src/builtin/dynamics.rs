//! Gating nodes: the envelope-driven noise gate and the zero-gap ramp.

use std::f32::consts::PI;

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, InstantiateCtx, PortDef, Ports};
use crate::error::PluginError;

/* noisegate */

/// Gate state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateMode {
    Closed,
    Opening,
    Hold,
    Open,
    Closing,
}

struct NoiseGate {
    rate: f32,
    gate: f32,
    hold: f32,
    mode: GateMode,
    level: f32,
}

impl Instance for NoiseGate {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let in_level = ports.control[0];
        let o_thres = ports.control[1];
        let c_thres = ports.control[2];
        let o_rate = 1.0 / (ports.control[3] * self.rate);
        let hold_samples = ports.control[4] * self.rate;
        let c_rate = 1.0 / (ports.control[5] * self.rate);

        let Some(out) = ports.audio_out[0].as_deref_mut() else {
            return;
        };
        let Some(input) = ports.audio_in[0] else {
            out[..n_samples].fill(0.0);
            return;
        };

        let mut gate = self.gate;
        let mut hold = self.hold;
        let mut mode = self.mode;
        let mut level = self.level;

        for (o, &x) in out[..n_samples].iter_mut().zip(input) {
            if in_level.is_nan() {
                // built-in envelope: peak hold with exponential decay
                let lev = x.abs();
                level = if lev > level {
                    lev
                } else {
                    lev * 0.05 + level * 0.95
                };
            } else {
                level = in_level;
            }

            match mode {
                GateMode::Closed => {
                    if level >= o_thres {
                        mode = GateMode::Opening;
                    }
                }
                GateMode::Opening => {
                    gate += o_rate;
                    if gate >= 1.0 {
                        gate = 1.0;
                        mode = GateMode::Hold;
                        hold = hold_samples;
                    }
                }
                GateMode::Hold => {
                    hold -= 1.0;
                    if hold <= 0.0 {
                        mode = GateMode::Open;
                    }
                }
                GateMode::Open => {
                    if level < c_thres {
                        mode = GateMode::Closing;
                    }
                }
                GateMode::Closing => {
                    gate -= c_rate;
                    if level >= o_thres {
                        mode = GateMode::Opening;
                    } else if gate <= 0.0 {
                        gate = 0.0;
                        mode = GateMode::Closed;
                    }
                }
            }
            *o = x * gate;
        }

        self.gate = gate;
        self.hold = hold;
        self.mode = mode;
        self.level = level;
    }
}

static NOISEGATE_PORTS: &[PortDef] = &[
    PortDef::audio_in(0, "In"),
    PortDef::audio_out(1, "Out"),
    PortDef::control_in(2, "Level", f32::NAN, 0.0, 1.0),
    PortDef::control_in(3, "Open Threshold", 0.04, 0.0, 1.0),
    PortDef::control_in(4, "Close Threshold", 0.03, 0.0, 1.0),
    PortDef::control_in(5, "Attack (s)", 0.005, 0.0, 1.0),
    PortDef::control_in(6, "Hold (s)", 0.050, 0.0, 1.0),
    PortDef::control_in(7, "Release (s)", 0.010, 0.0, 1.0),
];

pub(crate) static NOISEGATE: Desc = Desc {
    name: "noisegate",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: NOISEGATE_PORTS,
    make: |ctx: &InstantiateCtx| -> Result<Box<dyn Instance>, PluginError> {
        Ok(Box::new(NoiseGate {
            rate: ctx.sample_rate as f32,
            gate: 0.0,
            hold: 0.0,
            mode: GateMode::Closed,
            level: 0.0,
        }))
    },
};

/* zeroramp */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RampMode {
    Normal,
    Zero,
    FadeIn,
}

struct ZeroRamp {
    rate: f32,
    mode: RampMode,
    count: u32,
    last: f32,
}

impl Instance for ZeroRamp {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let gap = (ports.control[0] * self.rate) as u32;
        let duration = (ports.control[1] * self.rate) as u32;

        let Some(out) = ports.audio_out[0].as_deref_mut() else {
            return;
        };
        let Some(input) = ports.audio_in[0] else {
            out[..n_samples].fill(0.0);
            return;
        };

        for n in 0..n_samples {
            if self.mode == RampMode::Normal {
                out[n] = input[n];
                if input[n] == 0.0 {
                    self.count += 1;
                    if self.count == gap {
                        // a run of `gap` zeros: fade out the tail we already
                        // wrote and go silent
                        let mut c = 1u32;
                        let mut i = n;
                        while c < duration && i > 0 {
                            out[i - 1] = self.last
                                * (0.5 + 0.5 * (PI + PI * c as f32 / duration as f32).cos());
                            i -= 1;
                            c += 1;
                        }
                        self.mode = RampMode::Zero;
                    }
                } else {
                    self.count = 0;
                    self.last = input[n];
                }
            }
            if self.mode == RampMode::Zero {
                if input[n] != 0.0 {
                    self.mode = RampMode::FadeIn;
                    self.count = 0;
                } else {
                    out[n] = 0.0;
                }
            }
            if self.mode == RampMode::FadeIn {
                self.count += 1;
                out[n] = input[n]
                    * (0.5 + 0.5 * (PI + PI * self.count as f32 / duration as f32).cos());
                if self.count == duration {
                    self.count = 0;
                    self.mode = RampMode::Normal;
                }
            }
        }
    }
}

static ZERORAMP_PORTS: &[PortDef] = &[
    PortDef::audio_in(0, "In"),
    PortDef::audio_out(1, "Out"),
    PortDef::control_in(2, "Gap (s)", 0.000_666, 0.0, 1.0),
    PortDef::control_in(3, "Duration (s)", 0.000_666, 0.0, 1.0),
];

pub(crate) static ZERORAMP: Desc = Desc {
    name: "zeroramp",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: ZERORAMP_PORTS,
    make: |ctx: &InstantiateCtx| -> Result<Box<dyn Instance>, PluginError> {
        Ok(Box::new(ZeroRamp {
            rate: ctx.sample_rate as f32,
            mode: RampMode::Normal,
            count: 0,
            last: 0.0,
        }))
    },
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Plugin;

    fn run_gate(inst: &mut Box<dyn Instance>, input: &[f32], controls: &[f32]) -> Vec<f32> {
        let n = input.len();
        let mut out = vec![0.0f32; n];
        {
            let audio_in = [Some(input)];
            let mut out_slot: Option<&mut [f32]> = Some(&mut out);
            let outs = std::slice::from_mut(&mut out_slot);
            let mut notify: [f32; 0] = [];
            let mut ports = Ports {
                audio_in: &audio_in,
                audio_out: outs,
                control: controls,
                notify: &mut notify,
            };
            inst.run(&mut ports, n);
        }
        out
    }

    #[test]
    fn gate_blocks_quiet_signal() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("noisegate").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(48_000, 0, None))
            .unwrap();
        // quiet signal stays below the open threshold
        let input = vec![0.001f32; 512];
        let controls = [f32::NAN, 0.04, 0.03, 0.005, 0.05, 0.01];
        let out = run_gate(&mut inst, &input, &controls);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn gate_opens_on_loud_signal() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("noisegate").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(48_000, 0, None))
            .unwrap();
        let input = vec![0.5f32; 4_800];
        let controls = [f32::NAN, 0.04, 0.03, 0.005, 0.05, 0.01];
        let out = run_gate(&mut inst, &input, &controls);
        // after the attack the gate passes the signal
        assert!((out[4_799] - 0.5).abs() < 1e-3);
        // and the very first samples are still attenuated
        assert!(out[0].abs() < 0.5);
    }

    #[test]
    fn zeroramp_passes_nonzero_signal() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("zeroramp").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(48_000, 0, None))
            .unwrap();
        let input: Vec<f32> = (1..=64).map(|i| i as f32 / 64.0).collect();
        let out = run_gate(&mut inst, &input, &[0.000_666, 0.000_666]);
        assert_eq!(out, input);
    }

    #[test]
    fn zeroramp_silences_gaps() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("zeroramp").unwrap();
        // 1 kHz rate: gap of 4 samples, fade of 2
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(1_000, 0, None))
            .unwrap();
        let mut input = vec![0.5f32; 8];
        input.extend(std::iter::repeat_n(0.0f32, 16));
        input.extend(std::iter::repeat_n(0.5f32, 8));
        let out = run_gate(&mut inst, &input, &[0.004, 0.002]);
        // middle of the gap is exactly zero
        assert!(out[12..24].iter().all(|&s| s == 0.0));
        // signal comes back after the fade-in completes
        assert!((out[31] - 0.5).abs() < 1e-6);
    }
}
