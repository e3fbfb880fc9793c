//! EBU R128 loudness metering (`ebur128`) and the loudness-to-gain helper
//! (`lufs2gain`).
//!
//! The meter implements BS.1770-4: per-channel K-weighting (high shelf
//! plus high-pass), 400 ms gating blocks at 75% overlap for momentary and
//! integrated loudness, 3 s short-term windows, loudness range per EBU
//! Tech 3342, plus sample peak and 4x-oversampled true peak. Gated
//! statistics accumulate in fixed 0.1 LU histograms so the audio path
//! never allocates.
//!
//! Channel slots follow the original layout: FL, FR, FC, an unused slot,
//! SL, SR and a dual-mono slot; surround channels weigh 1.41, dual mono
//! counts twice.

use std::collections::VecDeque;
use std::f64::consts::PI;

use cadena_dsp::{Biquad, BiquadKind};
use serde::Deserialize;

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, InstantiateCtx, PortDef, Ports};
use crate::error::PluginError;

/// Channel slots of the meter.
const CHANNELS: usize = 7;
/// Channel weights per BS.1770 (surround 1.41, dual mono twice).
const WEIGHTS: [f32; CHANNELS] = [1.0, 1.0, 1.0, 0.0, 1.41, 1.41, 2.0];
/// Histogram over [-70, 5) LU in 0.1 LU bins.
const HIST_BINS: usize = 750;
/// Gating block is four 100 ms steps.
const BLOCK_STEPS: usize = 4;
/// Short-term window is thirty 100 ms steps.
const SHORTTERM_STEPS: usize = 30;
/// True-peak interpolator taps per phase.
const TP_TAPS: usize = 12;
/// Oversampling factor for true peak.
const TP_PHASES: usize = 4;

fn loudness(mean_square: f64) -> f32 {
    if mean_square <= 0.0 {
        f32::NEG_INFINITY
    } else {
        (-0.691 + 10.0 * mean_square.log10()) as f32
    }
}

fn bin_of(l: f32) -> Option<usize> {
    if l < -70.0 {
        return None;
    }
    let idx = ((f64::from(l) + 70.0) * 10.0) as usize;
    Some(idx.min(HIST_BINS - 1))
}

fn bin_loudness(idx: usize) -> f32 {
    -70.0 + (idx as f32 + 0.5) / 10.0
}

#[derive(Default, Clone, Copy)]
struct Hist {
    count: u64,
    power: f64,
}

/// 4x-oversampling FIR peak detector for one channel.
struct TruePeak {
    coefs: [[f32; TP_TAPS]; TP_PHASES],
    history: [f32; TP_TAPS],
    peak: f32,
}

impl TruePeak {
    fn new() -> Self {
        let mut coefs = [[0.0f32; TP_TAPS]; TP_PHASES];
        for (phase, row) in coefs.iter_mut().enumerate() {
            let frac = phase as f64 / TP_PHASES as f64;
            let mut sum = 0.0f64;
            for (k, c) in row.iter_mut().enumerate() {
                let x = k as f64 - (TP_TAPS / 2 - 1) as f64 - frac;
                let sinc = if x == 0.0 { 1.0 } else { (PI * x).sin() / (PI * x) };
                let window = 0.54 - 0.46 * (2.0 * PI * k as f64 / (TP_TAPS - 1) as f64).cos();
                *c = (sinc * window) as f32;
                sum += f64::from(*c);
            }
            for c in row.iter_mut() {
                *c = (f64::from(*c) / sum) as f32;
            }
        }
        Self {
            coefs,
            history: [0.0; TP_TAPS],
            peak: 0.0,
        }
    }

    fn process(&mut self, x: f32) {
        self.history.rotate_right(1);
        self.history[0] = x;
        for row in &self.coefs {
            let mut v = 0.0f32;
            for (c, h) in row.iter().zip(&self.history) {
                v += c * h;
            }
            self.peak = self.peak.max(v.abs());
        }
    }
}

/// One channel's K-weighting prefilter.
struct KWeight {
    shelf: Biquad,
    highpass: Biquad,
}

impl KWeight {
    fn new(rate: f64) -> Self {
        // BS.1770 stage 1: +4 dB high shelf at 1681.97 Hz; stage 2:
        // high-pass at 38.135 Hz.
        Self {
            shelf: Biquad::design(BiquadKind::Highshelf, 1681.97 * 2.0 / rate, 0.709, 3.99984),
            highpass: Biquad::design(BiquadKind::Highpass, 38.13547 * 2.0 / rate, 0.5003, 0.0),
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        self.highpass.process_sample(self.shelf.process_sample(x))
    }
}

/// The measurement engine, independent of the node port layout.
struct Meter {
    step_len: usize,
    window_steps: usize,

    kweight: Vec<KWeight>,
    true_peak: Vec<TruePeak>,
    sample_peak: f32,

    step_power: f64,
    step_fill: usize,
    steps: VecDeque<f64>,

    block_hist: [Hist; HIST_BINS],
    lra_hist: [Hist; HIST_BINS],
}

impl Meter {
    fn new(rate: u32, window_secs: f32) -> Self {
        let step_len = (rate / 10).max(1) as usize;
        let window_steps = ((window_secs * 10.0) as usize)
            .clamp(BLOCK_STEPS, 1200)
            .max(SHORTTERM_STEPS);
        Self {
            step_len,
            window_steps,
            kweight: (0..CHANNELS).map(|_| KWeight::new(f64::from(rate))).collect(),
            true_peak: (0..CHANNELS).map(|_| TruePeak::new()).collect(),
            sample_peak: 0.0,
            step_power: 0.0,
            step_fill: 0,
            steps: VecDeque::with_capacity(1201),
            block_hist: [Hist::default(); HIST_BINS],
            lra_hist: [Hist::default(); HIST_BINS],
        }
    }

    fn process(&mut self, inputs: &[Option<&[f32]>], n_samples: usize) {
        for i in 0..n_samples {
            let mut power = 0.0f64;
            for (c, slot) in inputs.iter().enumerate().take(CHANNELS) {
                let Some(input) = slot else { continue };
                let x = input[i];
                self.sample_peak = self.sample_peak.max(x.abs());
                self.true_peak[c].process(x);
                if WEIGHTS[c] == 0.0 {
                    continue;
                }
                let y = self.kweight[c].process(x);
                power += f64::from(WEIGHTS[c]) * f64::from(y) * f64::from(y);
            }
            self.step_power += power;
            self.step_fill += 1;
            if self.step_fill == self.step_len {
                self.finish_step();
            }
        }
    }

    fn finish_step(&mut self) {
        self.steps.push_back(self.step_power);
        self.step_power = 0.0;
        self.step_fill = 0;
        while self.steps.len() > self.window_steps.max(SHORTTERM_STEPS) {
            self.steps.pop_front();
        }

        // gating block: the newest 400 ms
        if self.steps.len() >= BLOCK_STEPS {
            let block = self.mean_square(BLOCK_STEPS);
            let l = loudness(block);
            if let Some(idx) = bin_of(l) {
                self.block_hist[idx].count += 1;
                self.block_hist[idx].power += block;
            }
        }
        // short-term value feeds the loudness-range distribution
        if self.steps.len() >= SHORTTERM_STEPS {
            let st = self.mean_square(SHORTTERM_STEPS);
            let l = loudness(st);
            if let Some(idx) = bin_of(l) {
                self.lra_hist[idx].count += 1;
                self.lra_hist[idx].power += st;
            }
        }
    }

    /// Mean square over the newest `steps` steps.
    fn mean_square(&self, steps: usize) -> f64 {
        if self.steps.len() < steps || steps == 0 {
            return 0.0;
        }
        let sum: f64 = self.steps.iter().rev().take(steps).sum();
        sum / (steps * self.step_len) as f64
    }

    fn momentary(&self) -> f32 {
        loudness(self.mean_square(BLOCK_STEPS))
    }

    fn shortterm(&self) -> f32 {
        loudness(self.mean_square(SHORTTERM_STEPS))
    }

    fn windowed(&self) -> f32 {
        loudness(self.mean_square(self.window_steps.min(self.steps.len())))
    }

    fn integrated(&self) -> f32 {
        let (mut count, mut power) = (0u64, 0.0f64);
        for h in &self.block_hist {
            count += h.count;
            power += h.power;
        }
        if count == 0 {
            return f32::NEG_INFINITY;
        }
        // relative gate: 10 LU below the absolute-gated mean
        let threshold = loudness(power / count as f64) - 10.0;
        let (mut count, mut power) = (0u64, 0.0f64);
        for (idx, h) in self.block_hist.iter().enumerate() {
            if bin_loudness(idx) >= threshold {
                count += h.count;
                power += h.power;
            }
        }
        if count == 0 {
            f32::NEG_INFINITY
        } else {
            loudness(power / count as f64)
        }
    }

    fn range(&self) -> f32 {
        let (mut count, mut power) = (0u64, 0.0f64);
        for h in &self.lra_hist {
            count += h.count;
            power += h.power;
        }
        if count == 0 {
            return 0.0;
        }
        // EBU Tech 3342: -20 LU relative gate, then the 10th..95th
        // percentile spread
        let threshold = loudness(power / count as f64) - 20.0;
        let gated: u64 = self
            .lra_hist
            .iter()
            .enumerate()
            .filter(|(idx, _)| bin_loudness(*idx) >= threshold)
            .map(|(_, h)| h.count)
            .sum();
        if gated == 0 {
            return 0.0;
        }
        let lo_target = (gated as f64 * 0.10) as u64;
        let hi_target = (gated as f64 * 0.95) as u64;
        let (mut seen, mut lo, mut hi) = (0u64, f32::NEG_INFINITY, f32::NEG_INFINITY);
        for (idx, h) in self.lra_hist.iter().enumerate() {
            if bin_loudness(idx) < threshold || h.count == 0 {
                continue;
            }
            if seen <= lo_target {
                lo = bin_loudness(idx);
            }
            if seen <= hi_target {
                hi = bin_loudness(idx);
            }
            seen += h.count;
        }
        (hi - lo).max(0.0)
    }

    fn true_peak(&self) -> f32 {
        self.true_peak
            .iter()
            .fold(0.0f32, |acc, tp| acc.max(tp.peak))
    }
}

#[derive(Debug, Deserialize)]
struct MeterConfig {
    #[serde(default = "default_window")]
    window: f32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
        }
    }
}

fn default_window() -> f32 {
    0.4
}

struct Ebur128 {
    meter: Meter,
}

impl Instance for Ebur128 {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        // pass audio through unchanged
        for c in 0..CHANNELS {
            if let (Some(input), Some(out)) =
                (ports.audio_in[c], ports.audio_out[c].as_deref_mut())
            {
                out[..n_samples].copy_from_slice(&input[..n_samples]);
            }
        }
        self.meter.process(ports.audio_in, n_samples);

        ports.notify[0] = self.meter.momentary();
        ports.notify[1] = self.meter.shortterm();
        ports.notify[2] = self.meter.integrated();
        ports.notify[3] = self.meter.windowed();
        ports.notify[4] = self.meter.range();
        ports.notify[5] = self.meter.sample_peak;
        ports.notify[6] = self.meter.true_peak();
    }
}

static EBUR128_PORTS: &[PortDef] = &[
    PortDef::audio_in(0, "In FL"),
    PortDef::audio_in(1, "In FR"),
    PortDef::audio_in(2, "In FC"),
    PortDef::audio_in(3, "In UNUSED"),
    PortDef::audio_in(4, "In SL"),
    PortDef::audio_in(5, "In SR"),
    PortDef::audio_in(6, "In DUAL MONO"),
    PortDef::audio_out(7, "Out FL"),
    PortDef::audio_out(8, "Out FR"),
    PortDef::audio_out(9, "Out FC"),
    PortDef::audio_out(10, "Out UNUSED"),
    PortDef::audio_out(11, "Out SL"),
    PortDef::audio_out(12, "Out SR"),
    PortDef::audio_out(13, "Out DUAL MONO"),
    PortDef::notify(14, "Momentary LUFS"),
    PortDef::notify(15, "Shortterm LUFS"),
    PortDef::notify(16, "Global LUFS"),
    PortDef::notify(17, "Window LUFS"),
    PortDef::notify(18, "Range LU"),
    PortDef::notify(19, "Peak"),
    PortDef::notify(20, "True Peak"),
];

pub(crate) static EBUR128: Desc = Desc {
    name: "ebur128",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: EBUR128_PORTS,
    make: |ctx: &InstantiateCtx| -> Result<Box<dyn Instance>, PluginError> {
        let config: MeterConfig = crate::builtin::optional_config("ebur128", ctx)?;
        Ok(Box::new(Ebur128 {
            meter: Meter::new(ctx.sample_rate, config.window),
        }))
    },
};

/* lufs2gain */

struct Lufs2Gain;

impl Instance for Lufs2Gain {
    fn run(&mut self, ports: &mut Ports<'_, '_>, _n_samples: usize) {
        let lufs = ports.control[0];
        let target = ports.control[1];
        ports.notify[0] = if lufs.is_finite() {
            10f32.powf((target - lufs) / 20.0)
        } else {
            1.0
        };
    }
}

static LUFS2GAIN_PORTS: &[PortDef] = &[
    PortDef::control_in(0, "LUFS", f32::NEG_INFINITY, -70.0, 0.0),
    PortDef::control_in(1, "Target LUFS", -23.0, -70.0, 0.0),
    PortDef::notify(2, "Gain"),
];

pub(crate) static LUFS2GAIN: Desc = Desc {
    name: "lufs2gain",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: LUFS2GAIN_PORTS,
    make: |_| Ok(Box::new(Lufs2Gain)),
};
