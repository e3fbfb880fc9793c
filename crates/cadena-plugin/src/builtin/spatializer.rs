//! HRIR spatializer: position a mono source with per-ear convolution.
//!
//! Impulse-response pairs come from an HRIR dataset (a JSON table of
//! measurements with spherical coordinates); the measurement nearest to
//! the requested `(azimuth, elevation, radius)` is selected. A control
//! change rebuilds both convolvers off the audio path; the next run
//! crossfades from the old pair to the new pair across one block so moves
//! never click.

use std::sync::Arc;

use serde::Deserialize;

use cadena_dsp::Convolver;

use crate::builtin::Desc;
use crate::descriptor::{
    DescriptorFlags, Instance, InstantiateCtx, PortDef, PortHints, Ports,
};
use crate::error::PluginError;

/// One measured HRIR pair.
#[derive(Debug, Clone, Deserialize)]
pub struct HrirMeasurement {
    /// Azimuth in degrees, counter-clockwise from straight ahead.
    pub azimuth: f32,
    /// Elevation in degrees.
    pub elevation: f32,
    /// Distance in meters.
    #[serde(default = "default_radius")]
    pub radius: f32,
    /// Left-ear impulse response.
    pub left: Vec<f32>,
    /// Right-ear impulse response.
    pub right: Vec<f32>,
}

fn default_radius() -> f32 {
    1.0
}

/// An HRIR dataset: sample rate plus measurements on a sphere.
#[derive(Debug, Clone, Deserialize)]
pub struct HrirDataset {
    /// Sample rate the responses were measured at.
    pub rate: u32,
    /// All measurements.
    pub measurements: Vec<HrirMeasurement>,
}

impl HrirDataset {
    /// Load a dataset from a JSON file.
    pub fn load(path: &str) -> Result<Self, PluginError> {
        let data = std::fs::read(path)?;
        let set: Self = serde_json::from_slice(&data)
            .map_err(|e| PluginError::bad_config(format!("hrir dataset '{path}': {e}")))?;
        if set.measurements.is_empty() {
            return Err(PluginError::bad_config(format!(
                "hrir dataset '{path}' has no measurements"
            )));
        }
        Ok(set)
    }

    /// Nearest measurement to spherical coordinates (degrees, meters).
    #[must_use]
    pub fn nearest(&self, azimuth: f32, elevation: f32, radius: f32) -> &HrirMeasurement {
        let target = spherical_to_cartesian(azimuth, elevation, radius);
        let mut best = &self.measurements[0];
        let mut best_d = f32::MAX;
        for m in &self.measurements {
            let p = spherical_to_cartesian(m.azimuth, m.elevation, m.radius);
            let d = (p[0] - target[0]).powi(2)
                + (p[1] - target[1]).powi(2)
                + (p[2] - target[2]).powi(2);
            if d < best_d {
                best_d = d;
                best = m;
            }
        }
        best
    }
}

fn spherical_to_cartesian(azimuth_deg: f32, elevation_deg: f32, radius: f32) -> [f32; 3] {
    let az = azimuth_deg.to_radians();
    let el = elevation_deg.to_radians();
    [
        radius * el.cos() * az.cos(),
        radius * el.cos() * az.sin(),
        radius * el.sin(),
    ]
}

#[derive(Debug, Deserialize)]
struct Config {
    file: String,
    #[serde(default)]
    blocksize: usize,
    #[serde(default)]
    tailsize: usize,
}

struct Spatializer {
    dataset: Arc<HrirDataset>,
    blocksize: usize,
    tailsize: usize,
    ir_len: usize,
    current: Option<(Convolver, Convolver)>,
    next: Option<(Convolver, Convolver)>,
    // pair replaced during a crossfade; freed on the main thread via work()
    retired: Option<(Convolver, Convolver)>,
    tmp_l: Vec<f32>,
    tmp_r: Vec<f32>,
}

impl Spatializer {
    fn build(&self, azimuth: f32, elevation: f32, radius: f32) -> Result<(Convolver, Convolver), PluginError> {
        let m = self.dataset.nearest(azimuth, elevation, radius);
        tracing::info!(
            azimuth = m.azimuth,
            elevation = m.elevation,
            radius = m.radius,
            "selecting hrir measurement"
        );
        let left = Convolver::new(self.blocksize, self.tailsize, &m.left)?;
        let right = Convolver::new(self.blocksize, self.tailsize, &m.right)?;
        Ok((left, right))
    }
}

impl Instance for Spatializer {
    fn control_changed(&mut self, control: &[f32]) {
        self.retired = None;
        match self.build(control[0], control[1], control[2]) {
            Ok(pair) => self.next = Some(pair),
            Err(e) => tracing::error!(error = %e, "hrir reload failed"),
        }
    }

    fn wants_work(&self) -> bool {
        self.retired.is_some()
    }

    fn work(&mut self) {
        self.retired = None;
    }

    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let Some(input) = ports.audio_in[0] else {
            for slot in ports.audio_out.iter_mut() {
                if let Some(out) = slot.as_deref_mut() {
                    out[..n_samples].fill(0.0);
                }
            }
            ports.notify[0] = self.ir_len as f32;
            return;
        };
        let input = &input[..n_samples];

        let (left_slot, right_slot) = ports.audio_out.split_at_mut(1);
        let (Some(out_l), Some(out_r)) = (
            left_slot[0].as_deref_mut(),
            right_slot[0].as_deref_mut(),
        ) else {
            ports.notify[0] = self.ir_len as f32;
            return;
        };

        if let Some(mut new_pair) = self.next.take() {
            if let Some(mut old_pair) = self.current.take() {
                // crossfade old -> new over this block
                let n = n_samples.min(self.tmp_l.len());
                old_pair.0.run(input, &mut out_l[..n_samples]);
                old_pair.1.run(input, &mut out_r[..n_samples]);
                new_pair.0.run(input, &mut self.tmp_l[..n]);
                new_pair.1.run(input, &mut self.tmp_r[..n]);
                for i in 0..n {
                    let t = i as f32 / n_samples as f32;
                    out_l[i] = out_l[i] * (1.0 - t) + self.tmp_l[i] * t;
                    out_r[i] = out_r[i] * (1.0 - t) + self.tmp_r[i] * t;
                }
                // freed later on the main thread, never here
                self.retired = Some(old_pair);
            } else {
                new_pair.0.run(input, &mut out_l[..n_samples]);
                new_pair.1.run(input, &mut out_r[..n_samples]);
            }
            self.current = Some(new_pair);
        } else if let Some(pair) = self.current.as_mut() {
            pair.0.run(input, &mut out_l[..n_samples]);
            pair.1.run(input, &mut out_r[..n_samples]);
        } else {
            out_l[..n_samples].fill(0.0);
            out_r[..n_samples].fill(0.0);
        }
        ports.notify[0] = self.ir_len as f32;
    }

    fn latency_samples(&self) -> Option<f32> {
        Some(self.ir_len as f32)
    }
}

fn make(ctx: &InstantiateCtx) -> Result<Box<dyn Instance>, PluginError> {
    let config: Config = crate::builtin::require_config("spatializer", ctx)?;
    let dataset = Arc::new(HrirDataset::load(&config.file)?);
    if dataset.rate != ctx.sample_rate {
        tracing::warn!(
            dataset_rate = dataset.rate,
            session_rate = ctx.sample_rate,
            "hrir dataset rate differs from session rate"
        );
    }

    let ir_len = dataset
        .measurements
        .iter()
        .map(|m| m.left.len().max(m.right.len()))
        .max()
        .unwrap_or(0);

    let blocksize = if config.blocksize == 0 {
        ir_len.clamp(64, 256)
    } else {
        config.blocksize
    };
    let tailsize = if config.tailsize == 0 {
        4096usize.clamp(blocksize, 32768)
    } else {
        config.tailsize
    };
    tracing::info!(ir_len, blocksize, tailsize, "spatializer configured");

    let mut node = Spatializer {
        dataset,
        blocksize,
        tailsize,
        ir_len,
        current: None,
        next: None,
        retired: None,
        tmp_l: vec![0.0; ctx.quantum_limit],
        tmp_r: vec![0.0; ctx.quantum_limit],
    };
    // default position: straight ahead at one meter
    node.current = Some(node.build(0.0, 0.0, 1.0)?);
    Ok(Box::new(node))
}

static SPATIALIZER_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out L"),
    PortDef::audio_out(1, "Out R"),
    PortDef::audio_in(2, "In"),
    PortDef::control_in(3, "Azimuth", 0.0, 0.0, 360.0),
    PortDef::control_in(4, "Elevation", 0.0, -90.0, 90.0),
    PortDef::control_in(5, "Radius", 1.0, 0.0, 100.0),
    PortDef::notify(6, "latency").with_hints(PortHints::LATENCY),
];

pub(crate) static SPATIALIZER: Desc = Desc {
    name: "spatializer",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: SPATIALIZER_PORTS,
    make,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Plugin;
    use serde_json::json;
    use std::io::Write;

    fn dataset_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let data = json!({
            "rate": 48_000,
            "measurements": [
                { "azimuth": 0.0, "elevation": 0.0, "radius": 1.0,
                  "left": [1.0], "right": [0.5] },
                { "azimuth": 90.0, "elevation": 0.0, "radius": 1.0,
                  "left": [0.25], "right": [1.0] },
            ]
        });
        write!(f, "{data}").unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn nearest_measurement_lookup() {
        let f = dataset_file();
        let set = HrirDataset::load(f.path().to_str().unwrap()).unwrap();
        assert_eq!(set.nearest(10.0, 0.0, 1.0).left[0], 1.0);
        assert_eq!(set.nearest(80.0, 0.0, 1.0).left[0], 0.25);
    }

    #[test]
    fn renders_both_ears() {
        let f = dataset_file();
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("spatializer").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(
                48_000,
                0,
                Some(json!({ "file": f.path().to_str().unwrap() })),
            ))
            .unwrap();

        let input = [1.0f32, 0.0, 0.0, 0.0];
        let mut out_l = [0.0f32; 4];
        let mut out_r = [0.0f32; 4];
        let mut notify = [0.0f32];
        {
            let audio_in = [Some(&input[..])];
            let mut slots: [Option<&mut [f32]>; 2] = [Some(&mut out_l), Some(&mut out_r)];
            let mut ports = Ports {
                audio_in: &audio_in,
                audio_out: &mut slots,
                control: &[0.0, 0.0, 1.0],
                notify: &mut notify,
            };
            inst.run(&mut ports, 4);
        }
        assert!((out_l[0] - 1.0).abs() < 1e-5);
        assert!((out_r[0] - 0.5).abs() < 1e-5);
        assert_eq!(notify[0], 1.0);
    }

    #[test]
    fn control_change_crossfades() {
        let f = dataset_file();
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("spatializer").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(
                48_000,
                0,
                Some(json!({ "file": f.path().to_str().unwrap() })),
            ))
            .unwrap();

        inst.control_changed(&[90.0, 0.0, 1.0]);

        let input = [1.0f32; 64];
        let mut out_l = [0.0f32; 64];
        let mut out_r = [0.0f32; 64];
        let mut notify = [0.0f32];
        {
            let audio_in = [Some(&input[..])];
            let mut slots: [Option<&mut [f32]>; 2] = [Some(&mut out_l), Some(&mut out_r)];
            let mut ports = Ports {
                audio_in: &audio_in,
                audio_out: &mut slots,
                control: &[90.0, 0.0, 1.0],
                notify: &mut notify,
            };
            inst.run(&mut ports, 64);
        }
        // starts at the old left gain (1.0), moves toward the new (0.25)
        assert!(out_l[0] > 0.9);
        assert!(out_l[63] < 0.35);
    }
}
