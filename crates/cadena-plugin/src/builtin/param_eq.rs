//! Parametric EQ: up to 64 biquads per channel over eight channels.
//!
//! Bands come either from a `filters` array in the config or from an EQ
//! preset text file (`filename`), with per-channel variants `filtersN` /
//! `filenameN` (N in 1..=8). A key without a channel suffix configures
//! channel 1 and is replicated to all eight channels.
//!
//! The preset format is one `Preamp: <gain> dB` line followed by band
//! lines like `Filter 1: ON PK Fc 21 Hz Gain 6.7 dB Q 1.100`. A preamp
//! gain is folded in as a high-shelf at 0 Hz, which degenerates to the
//! constant gain `10^(g/20)`.

use std::io::BufRead;
use std::path::Path;

use cadena_dsp::{Biquad, BiquadKind, Dsp};
use serde::Deserialize;

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, InstantiateCtx, PortDef, Ports};
use crate::error::PluginError;

/// Biquads per channel.
const MAX_BANDS: usize = 64;
/// Channel slots.
const CHANNELS: usize = 8;

#[derive(Debug, Deserialize)]
struct FilterSpec {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    freq: f64,
    #[serde(default = "default_q")]
    q: f64,
    #[serde(default)]
    gain: f64,
}

fn default_q() -> f64 {
    1.0
}

fn kind_from_name(name: &str) -> BiquadKind {
    match name {
        "bq_lowpass" => BiquadKind::Lowpass,
        "bq_highpass" => BiquadKind::Highpass,
        "bq_bandpass" => BiquadKind::Bandpass,
        "bq_lowshelf" => BiquadKind::Lowshelf,
        "bq_highshelf" => BiquadKind::Highshelf,
        "bq_peaking" => BiquadKind::Peaking,
        "bq_notch" => BiquadKind::Notch,
        "bq_allpass" => BiquadKind::Allpass,
        _ => BiquadKind::None,
    }
}

/// Parse an EQ preset text file into designed sections.
fn load_eq_bands(path: &Path, rate: f64) -> Result<Vec<Biquad>, PluginError> {
    let file = std::fs::File::open(path)
        .map_err(|e| PluginError::bad_config(format!("open '{}': {e}", path.display())))?;
    let reader = std::io::BufReader::new(file);
    let mut bands = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens[0].starts_with("Preamp") {
            // Preamp: -6.8 dB - always negative, folded in as a 0 Hz
            // high shelf (a constant gain).
            if let Some(gain) = tokens.get(1).and_then(|t| t.parse::<f64>().ok()) {
                tracing::info!(gain, "preamp as 0 Hz highshelf");
                bands.push(Biquad::design(BiquadKind::Highshelf, 0.0, 1.0, gain));
            }
            continue;
        }
        if tokens[0] != "Filter" || tokens.len() < 4 || tokens[2] != "ON" {
            continue;
        }
        if bands.len() == MAX_BANDS {
            return Err(PluginError::bad_config(format!(
                "'{}': more than {MAX_BANDS} bands",
                path.display()
            )));
        }
        let kind = match tokens[3] {
            "PK" => BiquadKind::Peaking,
            "LSC" => BiquadKind::Lowshelf,
            "HSC" => BiquadKind::Highshelf,
            _ => continue,
        };
        let value_after = |key: &str| -> Option<f64> {
            tokens
                .iter()
                .position(|&t| t == key)
                .and_then(|i| tokens.get(i + 1))
                .and_then(|t| t.parse().ok())
        };
        let (Some(freq), Some(gain), Some(q)) = (
            value_after("Fc"),
            value_after("Gain"),
            value_after("Q"),
        ) else {
            continue;
        };
        tracing::info!(band = bands.len(), ?kind, freq, q, gain, "preset band");
        bands.push(Biquad::design(kind, freq * 2.0 / rate, q, gain));
    }
    Ok(bands)
}

fn parse_filters(specs: &[FilterSpec], rate: f64) -> Result<Vec<Biquad>, PluginError> {
    if specs.len() > MAX_BANDS {
        return Err(PluginError::bad_config(format!(
            "more than {MAX_BANDS} filters"
        )));
    }
    Ok(specs
        .iter()
        .map(|s| {
            Biquad::design(
                kind_from_name(&s.kind),
                s.freq * 2.0 / rate,
                s.q,
                s.gain,
            )
        })
        .collect())
}

struct ParamEq {
    dsp: Dsp,
    n_bq: usize,
    bq: Vec<Biquad>, // CHANNELS * MAX_BANDS, channel-strided
}

impl Instance for ParamEq {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        for c in 0..CHANNELS {
            let Some(input) = ports.audio_in[c] else {
                continue;
            };
            let Some(out) = ports.audio_out[c].as_deref_mut() else {
                continue;
            };
            let sections = &mut self.bq[c * MAX_BANDS..c * MAX_BANDS + self.n_bq];
            let mut first = true;
            for s in sections.iter_mut() {
                if first {
                    self.dsp
                        .biquad_run(s, &mut out[..n_samples], &input[..n_samples]);
                    first = false;
                } else {
                    self.dsp.biquad_run_in_place(s, &mut out[..n_samples]);
                }
            }
            if first {
                out[..n_samples].copy_from_slice(&input[..n_samples]);
            }
        }
    }
}

fn channel_index(key: &str, prefix: &str) -> Option<usize> {
    let suffix = &key[prefix.len()..];
    if suffix.is_empty() {
        return Some(0);
    }
    suffix
        .parse::<usize>()
        .ok()
        .map(|n| n.clamp(1, CHANNELS) - 1)
}

fn make(ctx: &InstantiateCtx) -> Result<Box<dyn Instance>, PluginError> {
    let config = ctx
        .config
        .as_ref()
        .ok_or(PluginError::MissingConfig("param_eq"))?;
    let map = config
        .as_object()
        .ok_or_else(|| PluginError::bad_config("param_eq: config must be an object"))?;

    let rate = f64::from(ctx.sample_rate);
    // kind None sections pass through, so unused band slots are inert
    let mut bq = vec![Biquad::new(); CHANNELS * MAX_BANDS];
    let mut n_bq = 0usize;

    for (key, value) in map {
        let (bands, channel) = if key.starts_with("filename") {
            let Some(idx) = channel_index(key, "filename") else {
                continue;
            };
            let path = value
                .as_str()
                .ok_or_else(|| PluginError::bad_config("param_eq: filename requires a string"))?;
            (load_eq_bands(Path::new(path), rate)?, idx)
        } else if key.starts_with("filters") {
            let Some(idx) = channel_index(key, "filters") else {
                continue;
            };
            let specs: Vec<FilterSpec> = serde_json::from_value(value.clone())
                .map_err(|e| PluginError::bad_config(format!("param_eq filters: {e}")))?;
            (parse_filters(&specs, rate)?, idx)
        } else {
            tracing::warn!(key, "param_eq: ignoring config key");
            continue;
        };

        tracing::info!(bands = bands.len(), channel, "param_eq bands loaded");
        n_bq = n_bq.max(bands.len());
        let base = channel * MAX_BANDS;
        bq[base..base + bands.len()].copy_from_slice(&bands);
        bq[base + bands.len()..base + MAX_BANDS].fill(Biquad::new());

        // an unsuffixed key configures channel 1 and replicates everywhere
        if channel == 0 && !key.ends_with(|c: char| c.is_ascii_digit()) {
            let (first, rest) = bq.split_at_mut(MAX_BANDS);
            for chunk in rest.chunks_exact_mut(MAX_BANDS) {
                chunk.copy_from_slice(first);
            }
        }
    }

    Ok(Box::new(ParamEq {
        dsp: ctx.dsp,
        n_bq,
        bq,
    }))
}

static PARAM_EQ_PORTS: &[PortDef] = &[
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
];

pub(crate) static PARAM_EQ: Desc = Desc {
    name: "param_eq",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: PARAM_EQ_PORTS,
    make,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Plugin;
    use serde_json::json;
    use std::io::Write;

    fn run_channel(config: serde_json::Value, input: &[f32]) -> Vec<f32> {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("param_eq").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(48_000, 0, Some(config)))
            .unwrap();

        let n = input.len();
        let mut out = vec![0.0f32; n];
        {
            let mut audio_in: Vec<Option<&[f32]>> = vec![None; 8];
            audio_in[0] = Some(input);
            let mut slots: Vec<Option<&mut [f32]>> = Vec::new();
            slots.push(Some(out.as_mut_slice()));
            for _ in 1..8 {
                slots.push(None);
            }
            let mut notify: [f32; 0] = [];
            let mut ports = Ports {
                audio_in: &audio_in,
                audio_out: &mut slots,
                control: &[],
                notify: &mut notify,
            };
            inst.run(&mut ports, n);
        }
        out
    }

    #[test]
    fn no_bands_is_passthrough() {
        let input = [0.25f32, -0.5, 1.0];
        let out = run_channel(json!({ "filters": [] }), &input);
        assert_eq!(out, input);
    }

    #[test]
    fn preamp_scales_impulse_energy() {
        let mut preset = tempfile::NamedTempFile::new().unwrap();
        writeln!(preset, "Preamp: -6.0 dB").unwrap();
        preset.flush().unwrap();

        let input = [1.0f32, 0.0, 0.0, 0.0];
        let out = run_channel(
            json!({ "filename": preset.path().to_str().unwrap() }),
            &input,
        );
        let energy: f32 = out.iter().sum();
        let want = 10f32.powf(-6.0 / 20.0);
        assert!(
            (energy - want).abs() / want < 0.01,
            "energy {energy} vs {want}"
        );
    }

    #[test]
    fn preset_bands_are_parsed() {
        let mut preset = tempfile::NamedTempFile::new().unwrap();
        writeln!(preset, "Preamp: -2.0 dB").unwrap();
        writeln!(preset, "Filter 1: ON PK Fc 1000 Hz Gain 3.0 dB Q 1.000").unwrap();
        writeln!(preset, "Filter 2: OFF PK Fc 2000 Hz Gain 3.0 dB Q 1.000").unwrap();
        writeln!(preset, "Filter 3: ON HSC Fc 8000 Hz Gain -4.5 dB Q 0.700").unwrap();
        preset.flush().unwrap();

        let bands = load_eq_bands(preset.path(), 48_000.0).unwrap();
        // preamp + 2 enabled bands; the OFF line is skipped
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[1].kind, BiquadKind::Peaking);
        assert_eq!(bands[2].kind, BiquadKind::Highshelf);
    }

    #[test]
    fn filters_config_applies_per_channel() {
        let config = json!({
            "filters2": [ { "type": "bq_peaking", "freq": 100.0, "gain": 6.0, "q": 1.0 } ]
        });
        // channel 1 (index 0) stays flat
        let input = [1.0f32, 0.5, 0.25];
        let out = run_channel(config, &input);
        assert_eq!(out, input);
    }
}
