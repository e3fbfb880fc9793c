//! Signal sources: the free-running sine oscillator and the control ramp.

use std::f32::consts::PI;

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, InstantiateCtx, PortDef, Ports};
use crate::error::PluginError;

const TWO_PI: f32 = PI + PI;

/* sine */

struct Sine {
    rate: f32,
    accum: f32,
}

impl Instance for Sine {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let freq = ports.control[0];
        let ampl = ports.control[1];
        let offs = ports.control[3];
        let mut out = ports.audio_out[0].as_deref_mut();

        for n in 0..n_samples {
            let v = self.accum.sin() * ampl + offs;
            if let Some(out) = out.as_deref_mut() {
                out[n] = v;
            }
            if n == 0 {
                ports.notify[0] = v;
            }
            self.accum += TWO_PI * freq / self.rate;
            if self.accum >= TWO_PI {
                self.accum -= TWO_PI;
            }
        }
    }
}

static SINE_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::notify(1, "Notify"),
    PortDef::control_in(2, "Freq", 440.0, 0.0, 1_000_000.0),
    PortDef::control_in(3, "Ampl", 1.0, 0.0, 10.0),
    PortDef::control_in(4, "Phase", 0.0, -PI, PI),
    PortDef::control_in(5, "Offset", 0.0, -10.0, 10.0),
];

pub(crate) static SINE: Desc = Desc {
    name: "sine",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: SINE_PORTS,
    make: |ctx: &InstantiateCtx| -> Result<Box<dyn Instance>, PluginError> {
        Ok(Box::new(Sine {
            rate: ctx.sample_rate as f32,
            accum: 0.0,
        }))
    },
};

/* ramp */

struct Ramp {
    rate: f32,
    accum: f32,
}

impl Instance for Ramp {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let mut start = ports.control[0];
        let mut stop = ports.control[1];
        let duration = ports.control[2];
        let inc = (stop - start) / (duration * self.rate);
        let last = stop;
        if inc < 0.0 {
            std::mem::swap(&mut start, &mut stop);
        }

        if let Some(out) = ports.audio_out[0].as_deref_mut() {
            if self.accum == last {
                out[..n_samples].fill(last);
            } else {
                for o in &mut out[..n_samples] {
                    *o = self.accum;
                    self.accum = (self.accum + inc).clamp(start, stop);
                }
            }
        } else {
            self.accum = (self.accum + n_samples as f32 * inc).clamp(start, stop);
        }
        ports.notify[0] = self.accum;
    }
}

static RAMP_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::control_in(1, "Start", 0.0, -1.0, 1.0),
    PortDef::control_in(2, "Stop", 0.0, -1.0, 1.0),
    PortDef::notify(3, "Current"),
    PortDef::control_in(4, "Duration (s)", 0.1, 0.0, 100.0),
];

pub(crate) static RAMP: Desc = Desc {
    name: "ramp",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: RAMP_PORTS,
    make: |ctx: &InstantiateCtx| -> Result<Box<dyn Instance>, PluginError> {
        Ok(Box::new(Ramp {
            rate: ctx.sample_rate as f32,
            accum: 0.0,
        }))
    },
};
