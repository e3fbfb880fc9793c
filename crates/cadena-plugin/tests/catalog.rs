//! Catalog-wide smoke test: every builtin node instantiates and survives a
//! quantum of silence with fully-bound ports.

use std::io::Write;

use cadena_plugin::builtin::BuiltinPlugin;
use cadena_plugin::{InstantiateCtx, Plugin, Ports};
use serde_json::json;

const N: usize = 256;

fn config_for(label: &str) -> Option<serde_json::Value> {
    match label {
        "convolver" => Some(json!({ "filename": "/dirac" })),
        "bq_raw" => Some(json!({
            "coefficients": [ { "rate": 48_000, "b0": 1.0, "a0": 1.0 } ]
        })),
        "param_eq" => Some(json!({ "filters": [] })),
        "pipe" => Some(json!({ "command": "cat" })),
        "spatializer" => {
            let mut f = tempfile::NamedTempFile::new().unwrap();
            let data = json!({
                "rate": 48_000,
                "measurements": [
                    { "azimuth": 0.0, "elevation": 0.0, "left": [1.0], "right": [1.0] }
                ]
            });
            write!(f, "{data}").unwrap();
            f.flush().unwrap();
            let (_, path) = f.keep().unwrap();
            Some(json!({ "file": path.to_str().unwrap() }))
        }
        _ => None,
    }
}

#[test]
fn every_node_runs_a_silent_quantum() {
    let plugin = BuiltinPlugin::new();
    for label in BuiltinPlugin::labels() {
        let desc = plugin.make_descriptor(label).unwrap();
        let ctx = InstantiateCtx::new(48_000, 0, config_for(label));
        let mut inst = desc
            .instantiate(&ctx)
            .unwrap_or_else(|e| panic!("{label}: {e}"));

        let ports = desc.ports();
        let n_in = ports.iter().filter(|p| p.is_audio_in()).count();
        let n_out = ports.iter().filter(|p| p.is_audio_out()).count();
        let n_notify = ports.iter().filter(|p| p.is_notify()).count();
        let controls: Vec<f32> = ports
            .iter()
            .filter(|p| p.is_control_in())
            .map(|p| p.def)
            .collect();

        let silence = vec![0.0f32; N];
        let audio_in: Vec<Option<&[f32]>> = (0..n_in).map(|_| Some(silence.as_slice())).collect();
        let mut out_bufs: Vec<Vec<f32>> = (0..n_out).map(|_| vec![0.0f32; N]).collect();
        let mut notify = vec![0.0f32; n_notify];

        inst.activate();
        {
            let mut slots: Vec<Option<&mut [f32]>> = out_bufs
                .iter_mut()
                .map(|b| Some(b.as_mut_slice()))
                .collect();
            let mut p = Ports {
                audio_in: &audio_in,
                audio_out: &mut slots,
                control: &controls,
                notify: &mut notify,
            };
            inst.run(&mut p, N);
            inst.run(&mut p, N);
        }
        inst.deactivate();

        for (i, buf) in out_bufs.iter().enumerate() {
            assert!(
                buf.iter().all(|s| s.is_finite()),
                "{label}: output {i} not finite"
            );
        }
    }
}
