//! The biquad node family: `bq_lowpass` through `bq_allpass` plus
//! `bq_raw`.
//!
//! Designed kinds recompute their section only when `Freq`, `Q` or `Gain`
//! changed since the last run; `bq_raw` watches the six coefficient ports
//! instead and additionally accepts a `coefficients` config array with
//! per-rate entries, picking the entry whose rate is closest to the
//! session rate.

use cadena_dsp::{Biquad, BiquadKind, Dsp};
use serde::Deserialize;

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, InstantiateCtx, PortDef, Ports};
use crate::error::PluginError;

fn kind_from_label(label: &str) -> BiquadKind {
    match label {
        "bq_lowpass" => BiquadKind::Lowpass,
        "bq_highpass" => BiquadKind::Highpass,
        "bq_bandpass" => BiquadKind::Bandpass,
        "bq_lowshelf" => BiquadKind::Lowshelf,
        "bq_highshelf" => BiquadKind::Highshelf,
        "bq_peaking" => BiquadKind::Peaking,
        "bq_notch" => BiquadKind::Notch,
        "bq_allpass" => BiquadKind::Allpass,
        _ => BiquadKind::Raw,
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    coefficients: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    rate: u32,
    #[serde(default = "one")]
    b0: f64,
    #[serde(default)]
    b1: f64,
    #[serde(default)]
    b2: f64,
    #[serde(default = "one")]
    a0: f64,
    #[serde(default)]
    a1: f64,
    #[serde(default)]
    a2: f64,
}

fn one() -> f64 {
    1.0
}

struct BqNode {
    dsp: Dsp,
    rate: f64,
    kind: BiquadKind,
    bq: Biquad,
    // last-seen control values, to recompute only on change
    freq: f32,
    q: f32,
    gain: f32,
    raw_ports: [f32; 6],
}

impl BqNode {
    fn new(kind: BiquadKind, ctx: &InstantiateCtx) -> Result<Self, PluginError> {
        let mut node = Self {
            dsp: ctx.dsp,
            rate: f64::from(ctx.sample_rate),
            kind,
            bq: Biquad::new(),
            freq: 0.0,
            q: 0.0,
            gain: 0.0,
            raw_ports: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        };

        if kind == BiquadKind::Raw {
            let config: RawConfig = crate::builtin::require_config("bq_raw", ctx)?;
            let mut best: Option<u32> = None;
            for entry in &config.coefficients {
                let better = match best {
                    None => true,
                    Some(b) => {
                        i64::from(entry.rate).abs_diff(i64::from(ctx.sample_rate))
                            < i64::from(b).abs_diff(i64::from(ctx.sample_rate))
                    }
                };
                if better {
                    best = Some(entry.rate);
                    node.bq
                        .set_raw(entry.b0, entry.b1, entry.b2, entry.a0, entry.a1, entry.a2);
                }
            }
        }
        Ok(node)
    }

    fn design(&mut self, freq: f32, q: f32, gain: f32) {
        self.freq = freq;
        self.q = q;
        self.gain = gain;
        self.bq.set(
            self.kind,
            f64::from(freq) * 2.0 / self.rate,
            f64::from(q),
            f64::from(gain),
        );
    }
}

impl Instance for BqNode {
    fn activate(&mut self) {
        if self.kind != BiquadKind::Raw {
            // force a redesign from the current control values on first run
            self.freq = f32::NAN;
        }
    }

    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        if self.kind == BiquadKind::Raw {
            let now: [f32; 6] = [
                ports.control[3],
                ports.control[4],
                ports.control[5],
                ports.control[6],
                ports.control[7],
                ports.control[8],
            ];
            if now != self.raw_ports {
                self.raw_ports = now;
                self.bq.set_raw(
                    f64::from(now[0]),
                    f64::from(now[1]),
                    f64::from(now[2]),
                    f64::from(now[3]),
                    f64::from(now[4]),
                    f64::from(now[5]),
                );
            }
        } else {
            let (freq, q, gain) = (ports.control[0], ports.control[1], ports.control[2]);
            if freq != self.freq || q != self.q || gain != self.gain {
                self.design(freq, q, gain);
            }
        }

        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            self.dsp
                .biquad_run(&mut self.bq, &mut out[..n_samples], &input[..n_samples]);
        }
    }
}

static BQ_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In"),
    PortDef::control_in(2, "Freq", 0.0, 0.0, 1_000_000.0),
    PortDef::control_in(3, "Q", 0.0, 0.0, 10.0),
    PortDef::control_in(4, "Gain", 0.0, -120.0, 40.0),
    PortDef::control_in(5, "b0", 1.0, -10.0, 10.0),
    PortDef::control_in(6, "b1", 0.0, -10.0, 10.0),
    PortDef::control_in(7, "b2", 0.0, -10.0, 10.0),
    PortDef::control_in(8, "a0", 1.0, -10.0, 10.0),
    PortDef::control_in(9, "a1", 0.0, -10.0, 10.0),
    PortDef::control_in(10, "a2", 0.0, -10.0, 10.0),
];

macro_rules! bq_desc {
    ($static_name:ident, $label:literal) => {
        pub(crate) static $static_name: Desc = Desc {
            name: $label,
            flags: DescriptorFlags::SUPPORTS_NULL_DATA,
            ports: BQ_PORTS,
            make: |ctx| Ok(Box::new(BqNode::new(kind_from_label($label), ctx)?)),
        };
    };
}

bq_desc!(BQ_LOWPASS, "bq_lowpass");
bq_desc!(BQ_HIGHPASS, "bq_highpass");
bq_desc!(BQ_BANDPASS, "bq_bandpass");
bq_desc!(BQ_LOWSHELF, "bq_lowshelf");
bq_desc!(BQ_HIGHSHELF, "bq_highshelf");
bq_desc!(BQ_PEAKING, "bq_peaking");
bq_desc!(BQ_NOTCH, "bq_notch");
bq_desc!(BQ_ALLPASS, "bq_allpass");
bq_desc!(BQ_RAW, "bq_raw");
