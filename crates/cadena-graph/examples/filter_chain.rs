//! Build a small EQ chain, run a block through it and print the result.
//!
//! Run with: `cargo run --example filter_chain`

use cadena_graph::{FilterGraph, GraphConfig, PluginRegistry};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = GraphConfig::from_json_str(
        r#"{
            "nodes": [
                { "label": "bq_highpass", "name": "hp",
                  "control": { "Freq": 80.0, "Q": 0.707 } },
                { "label": "bq_peaking", "name": "presence",
                  "control": { "Freq": 3000.0, "Q": 1.2, "Gain": 4.0 } },
                { "label": "mixer", "name": "out_gain",
                  "control": { "Gain 1": 0.9 } }
            ],
            "links": [
                { "output": "hp:Out", "input": "presence:In" },
                { "output": "presence:Out", "input": "out_gain:In 1" }
            ],
            "inputs":  [ "hp:In" ],
            "outputs": [ "out_gain:Out" ]
        }"#,
    )?;

    let registry = PluginRegistry::new();
    let mut graph = FilterGraph::load(&config, &registry)?;
    graph.activate(48_000, 1, 1, 256)?;

    let (min, max) = graph.latency();
    println!("graph ready: {} handle(s), latency {min}..{max} samples", graph.n_handles());

    // a short burst: impulse followed by a low rumble
    let mut input = [0.0f32; 64];
    input[0] = 1.0;
    for (i, s) in input.iter_mut().enumerate().skip(1) {
        *s = 0.25 * (i as f32 * 0.05).sin();
    }

    let mut output = [0.0f32; 64];
    {
        let ins = [Some(&input[..])];
        let mut out_slot: Option<&mut [f32]> = Some(&mut output);
        graph.run(&ins, std::slice::from_mut(&mut out_slot), 64);
    }
    graph.process_work();

    println!("in : {:?}", &input[..8]);
    println!("out: {:?}", &output[..8]);
    Ok(())
}
