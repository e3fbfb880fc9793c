//! Fixed-capacity circular delay.
//!
//! The line is sized from the `max-delay` config (seconds, default 1.0)
//! at instantiation; the `Delay (s)` control moves the tap within that
//! range and the current delay is published as latency.

use serde::Deserialize;

use crate::builtin::Desc;
use crate::descriptor::{
    DescriptorFlags, Instance, InstantiateCtx, PortDef, PortHints, Ports,
};
use crate::error::PluginError;

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(rename = "max-delay", default = "default_max_delay")]
    max_delay: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_delay: default_max_delay(),
        }
    }
}

fn default_max_delay() -> f32 {
    1.0
}

struct DelayNode {
    dsp: cadena_dsp::Dsp,
    rate: f32,
    buffer: Vec<f32>,
    pos: usize,
    delay: f32,
    delay_samples: usize,
}

impl Instance for DelayNode {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let delay = ports.control[0];
        if delay != self.delay {
            self.delay = delay;
            self.delay_samples =
                ((delay * self.rate) as usize).min(self.buffer.len().saturating_sub(1));
        }
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            self.dsp.delay(
                &mut self.buffer,
                &mut self.pos,
                self.delay_samples,
                &mut out[..n_samples],
                &input[..n_samples],
                0.0,
                0.0,
            );
        }
        ports.notify[0] = self.delay_samples as f32;
    }

    fn latency_samples(&self) -> Option<f32> {
        Some(self.delay_samples as f32)
    }
}

fn make(ctx: &InstantiateCtx) -> Result<Box<dyn Instance>, PluginError> {
    let config: Config = crate::builtin::optional_config("delay", ctx)?;
    if config.max_delay <= 0.0 {
        return Err(PluginError::bad_config("delay: max-delay must be positive"));
    }
    let samples = ((config.max_delay * ctx.sample_rate as f32) as usize).max(1);
    Ok(Box::new(DelayNode {
        dsp: ctx.dsp,
        rate: ctx.sample_rate as f32,
        buffer: vec![0.0; samples],
        pos: 0,
        delay: 0.0,
        delay_samples: 0,
    }))
}

static DELAY_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In"),
    PortDef::control_in(2, "Delay (s)", 0.0, 0.0, 100.0),
    PortDef::notify(3, "latency").with_hints(PortHints::LATENCY),
];

pub(crate) static DELAY: Desc = Desc {
    name: "delay",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: DELAY_PORTS,
    make,
};
