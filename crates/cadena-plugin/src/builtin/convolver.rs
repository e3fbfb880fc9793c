//! FFT convolver node.
//!
//! The impulse response comes from a WAV file, a rate-suffixed list of
//! files (the one closest to the session rate wins), or a synthetic form:
//! `/dirac`, `/hilbert`, or an inline `/ir:[rate, samples...]` list. The
//! response can be windowed (`offset`, `length`, `channel`), scaled
//! (`gain`), padded with `delay` (seconds, or samples when written as an
//! integer) and is resampled to the session rate when it was recorded at
//! another one.

use std::f32::consts::PI;

use serde::Deserialize;

use cadena_dsp::Convolver;

use crate::builtin::Desc;
use crate::descriptor::{
    DescriptorFlags, Instance, InstantiateCtx, PortDef, PortHints, Ports,
};
use crate::error::PluginError;

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    blocksize: usize,
    #[serde(default)]
    tailsize: usize,
    filename: Filenames,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    length: i64,
    #[serde(default)]
    channel: Option<usize>,
    #[serde(default = "default_gain")]
    gain: f32,
    #[serde(default)]
    delay: Delay,
    #[serde(default)]
    resample_quality: Option<u32>,
    #[serde(default = "default_latency")]
    latency: f32,
}

fn default_gain() -> f32 {
    1.0
}

fn default_latency() -> f32 {
    -1.0
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Filenames {
    One(String),
    Many(Vec<String>),
}

impl Filenames {
    fn as_slice(&self) -> Vec<&str> {
        match self {
            Self::One(s) => vec![s.as_str()],
            Self::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Delay before the response: integer values are samples, floats seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Delay {
    #[default]
    None,
    Samples(i64),
    Seconds(f64),
}

impl Delay {
    fn to_seconds(&self, rate: u32) -> f64 {
        let s = match self {
            Self::None => 0.0,
            Self::Samples(n) => *n as f64 / f64::from(rate),
            Self::Seconds(s) => *s,
        };
        s.max(0.0)
    }
}

/// A probed impulse response source.
struct IrSource<'a> {
    name: &'a str,
    rate: u32,
    frames: usize,
    channels: usize,
}

fn probe(name: &str, session_rate: u32) -> Result<IrSource<'_>, PluginError> {
    if name.starts_with("/hilbert") {
        Ok(IrSource {
            name,
            rate: session_rate,
            frames: 64,
            channels: 1,
        })
    } else if name.starts_with("/dirac") {
        Ok(IrSource {
            name,
            rate: session_rate,
            frames: 1,
            channels: 1,
        })
    } else if let Some(body) = name.strip_prefix("/ir:") {
        let values: Vec<f64> = serde_json::from_str(body)
            .map_err(|e| PluginError::bad_config(format!("inline ir: {e}")))?;
        if values.is_empty() {
            return Err(PluginError::bad_config("inline ir needs a rate"));
        }
        Ok(IrSource {
            name,
            rate: values[0] as u32,
            frames: values.len() - 1,
            channels: 1,
        })
    } else {
        let reader = hound::WavReader::open(name)
            .map_err(|e| PluginError::bad_config(format!("open '{name}': {e}")))?;
        let spec = reader.spec();
        Ok(IrSource {
            name,
            rate: spec.sample_rate,
            frames: reader.duration() as usize,
            channels: spec.channels as usize,
        })
    }
}

fn read_samples(
    source: &IrSource<'_>,
    gain: f32,
    delay_frames: usize,
    offset: usize,
    length: usize,
    channel: usize,
) -> Result<Vec<f32>, PluginError> {
    let mut length = if length == 0 {
        source.frames
    } else {
        length.min(source.frames)
    };
    length -= offset.min(length);

    let total = delay_frames + length;
    let mut samples = vec![0.0f32; total];
    if length == 0 {
        return Ok(samples);
    }

    if source.name.starts_with("/hilbert") {
        let gain = gain * 2.0 / PI;
        let h = length / 2;
        let mut i = 1;
        while i < h {
            let v = (gain / i as f32) * (0.43 + 0.57 * (i as f32 * PI / h as f32).cos());
            samples[delay_frames + h + i] = -v;
            samples[delay_frames + h - i] = v;
            i += 2;
        }
    } else if source.name.starts_with("/dirac") {
        samples[delay_frames] = gain;
    } else if let Some(body) = source.name.strip_prefix("/ir:") {
        let values: Vec<f64> = serde_json::from_str(body)
            .map_err(|e| PluginError::bad_config(format!("inline ir: {e}")))?;
        for (i, v) in values.iter().skip(1 + offset).take(length).enumerate() {
            samples[delay_frames + i] = *v as f32 * gain;
        }
    } else {
        let mut reader = hound::WavReader::open(source.name)
            .map_err(|e| PluginError::bad_config(format!("open '{}': {e}", source.name)))?;
        let spec = reader.spec();
        let channel = channel % source.channels;
        reader
            .seek(offset as u32)
            .map_err(|e| PluginError::bad_config(format!("seek '{}': {e}", source.name)))?;
        match spec.sample_format {
            hound::SampleFormat::Float => {
                for (i, s) in reader
                    .samples::<f32>()
                    .enumerate()
                    .take(length * source.channels)
                {
                    if i % source.channels == channel {
                        let s = s.map_err(|e| {
                            PluginError::bad_config(format!("read '{}': {e}", source.name))
                        })?;
                        samples[delay_frames + i / source.channels] = s * gain;
                    }
                }
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                for (i, s) in reader
                    .samples::<i32>()
                    .enumerate()
                    .take(length * source.channels)
                {
                    if i % source.channels == channel {
                        let s = s.map_err(|e| {
                            PluginError::bad_config(format!("read '{}': {e}", source.name))
                        })?;
                        samples[delay_frames + i / source.channels] = s as f32 * scale * gain;
                    }
                }
            }
        }
    }
    Ok(samples)
}

/// Linear-interpolation resampler with the energy compensation the direct
/// form needs (`in_rate / out_rate` gain so the convolution integral is
/// preserved).
fn resample(samples: Vec<f32>, in_rate: u32, out_rate: u32) -> Vec<f32> {
    if in_rate == out_rate || samples.is_empty() {
        return samples;
    }
    let out_len = (samples.len() as u64 * u64::from(out_rate)).div_ceil(u64::from(in_rate)) as usize;
    let step = f64::from(in_rate) / f64::from(out_rate);
    let gain = in_rate as f32 / out_rate as f32;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples.get(idx).copied().unwrap_or(0.0);
        let b = samples.get(idx + 1).copied().unwrap_or(0.0);
        out.push((a + (b - a) * frac) * gain);
    }
    out
}

struct ConvolverNode {
    conv: Convolver,
    latency: f32,
}

impl Instance for ConvolverNode {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            self.conv.run(&input[..n_samples], &mut out[..n_samples]);
        }
        ports.notify[0] = self.latency;
    }

    fn deactivate(&mut self) {
        self.conv.reset();
    }

    fn latency_samples(&self) -> Option<f32> {
        Some(self.latency)
    }
}

fn make(ctx: &InstantiateCtx) -> Result<Box<dyn Instance>, PluginError> {
    let config: Config = crate::builtin::require_config("convolver", ctx)?;
    let names = config.filename.as_slice();
    if names.is_empty() {
        return Err(PluginError::bad_config("convolver: filename was not given"));
    }

    // probe all candidates, pick the rate closest to the session rate
    let mut best: Option<IrSource<'_>> = None;
    let mut errors = Vec::new();
    for name in names {
        match probe(name, ctx.sample_rate) {
            Ok(src) => {
                let keep = match &best {
                    None => true,
                    Some(b) => {
                        i64::from(src.rate).abs_diff(i64::from(ctx.sample_rate))
                            < i64::from(b.rate).abs_diff(i64::from(ctx.sample_rate))
                    }
                };
                if keep {
                    best = Some(src);
                }
            }
            Err(e) => errors.push(format!("{name}: {e}")),
        }
    }
    let source = best.ok_or_else(|| {
        PluginError::bad_config(format!("convolver: no usable response ({})", errors.join("; ")))
    })?;
    tracing::info!(name = source.name, rate = source.rate, "loading impulse response");

    let delay_sec = config.delay.to_seconds(ctx.sample_rate);
    let delay_frames = (delay_sec * f64::from(source.rate)) as usize;
    let offset = config.offset.max(0) as usize;
    let length = config.length.max(0) as usize;
    let channel = config.channel.unwrap_or(ctx.index);

    let mut samples = read_samples(
        &source,
        config.gain,
        delay_frames,
        offset,
        length,
        channel,
    )?;
    if source.rate != ctx.sample_rate {
        if let Some(q) = config.resample_quality {
            tracing::debug!(quality = q, "resampling with linear interpolation");
        }
        samples = resample(samples, source.rate, ctx.sample_rate);
    }
    let n_samples = samples.len();

    let blocksize = if config.blocksize == 0 {
        n_samples.clamp(64, 256)
    } else {
        config.blocksize
    };
    let tailsize = if config.tailsize == 0 {
        4096usize.clamp(blocksize, 32768)
    } else {
        config.tailsize
    };
    tracing::info!(n_samples, blocksize, tailsize, "convolver configured");

    let conv = Convolver::new(blocksize, tailsize, &samples)?;
    let latency = if config.latency < 0.0 {
        n_samples as f32
    } else {
        config.latency * ctx.sample_rate as f32
    };

    Ok(Box::new(ConvolverNode { conv, latency }))
}

static CONVOLVER_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In"),
    PortDef::notify(2, "latency").with_hints(PortHints::LATENCY),
];

pub(crate) static CONVOLVER: Desc = Desc {
    name: "convolver",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: CONVOLVER_PORTS,
    make,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Plugin;
    use serde_json::json;

    fn run_node(config: serde_json::Value, input: &[f32]) -> Vec<f32> {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("convolver").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(48_000, 0, Some(config)))
            .unwrap();
        let n = input.len();
        let mut out = vec![0.0f32; n];
        let mut notify = [0.0f32];
        {
            let audio_in = [Some(input)];
            let mut out_slot: Option<&mut [f32]> = Some(&mut out);
            let outs = std::slice::from_mut(&mut out_slot);
            let mut ports = Ports {
                audio_in: &audio_in,
                audio_out: outs,
                control: &[],
                notify: &mut notify,
            };
            inst.run(&mut ports, n);
        }
        out
    }

    #[test]
    fn dirac_with_gain() {
        let out = run_node(
            json!({ "filename": "/dirac", "gain": 2.0 }),
            &[0.5, 0.0, 0.0, 0.0],
        );
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!(out[1..].iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn inline_ir() {
        // rate matches the session, two taps: echo at one sample
        let out = run_node(
            json!({ "filename": "/ir:[48000, 1.0, 0.5]" }),
            &[1.0, 0.0, 0.0, 0.0],
        );
        assert!((out[0] - 1.0).abs() < 1e-5);
        assert!((out[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn integer_delay_is_samples() {
        let out = run_node(
            json!({ "filename": "/dirac", "delay": 3 }),
            &[1.0, 0.0, 0.0, 0.0, 0.0],
        );
        assert!(out[..3].iter().all(|&s| s.abs() < 1e-6));
        assert!((out[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn negative_delay_clamps_to_zero() {
        let out = run_node(
            json!({ "filename": "/dirac", "delay": -5 }),
            &[1.0, 0.0],
        );
        assert!((out[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_file_is_bad_config() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("convolver").unwrap();
        let ctx = InstantiateCtx::new(
            48_000,
            0,
            Some(json!({ "filename": "/no/such/file.wav" })),
        );
        assert!(desc.instantiate(&ctx).is_err());
    }

    #[test]
    fn latency_reported_in_samples() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("convolver").unwrap();
        let inst = desc
            .instantiate(&InstantiateCtx::new(
                48_000,
                0,
                Some(json!({ "filename": "/dirac", "latency": 0.5 })),
            ))
            .unwrap();
        assert_eq!(inst.latency_samples(), Some(24_000.0));
    }
}
