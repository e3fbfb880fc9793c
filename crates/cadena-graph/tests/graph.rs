//! End-to-end graph scenarios: routing, mixing, channel duplication,
//! volumes and latency reporting.

use cadena_graph::{
    Direction, FilterGraph, GraphConfig, GraphError, PluginRegistry,
};

fn load(json: &str) -> FilterGraph {
    // RUST_LOG=debug surfaces the engine's setup decisions when a
    // scenario goes sideways
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let config = GraphConfig::from_json_str(json).unwrap();
    FilterGraph::load(&config, &PluginRegistry::new()).unwrap()
}

fn run_graph(
    graph: &mut FilterGraph,
    inputs: &[&[f32]],
    n_outputs: usize,
    n_samples: usize,
) -> Vec<Vec<f32>> {
    let mut outs: Vec<Vec<f32>> = (0..n_outputs).map(|_| vec![0.0; n_samples]).collect();
    {
        let ins: Vec<Option<&[f32]>> = inputs.iter().map(|s| Some(*s)).collect();
        let mut slots: Vec<Option<&mut [f32]>> =
            outs.iter_mut().map(|b| Some(b.as_mut_slice())).collect();
        graph.run(&ins, &mut slots, n_samples);
    }
    outs
}

#[test]
fn copy_node_passes_through() {
    let mut graph = load(r#"{ "nodes": [ { "label": "copy", "name": "c" } ] }"#);
    graph.activate(48_000, 1, 1, 1024).unwrap();

    let input = [0.0f32, 1.0, 2.0, 3.0];
    let outs = run_graph(&mut graph, &[&input], 1, 4);
    assert_eq!(outs[0], input);
}

#[test]
fn mixer_with_gains() {
    let mut graph = load(
        r#"{
            "nodes": [ { "label": "mixer", "name": "mix",
                         "control": { "Gain 1": 0.5, "Gain 2": 0.25 } } ],
            "inputs": [ "In 1", "In 2" ],
            "outputs": [ "Out" ]
        }"#,
    );
    graph.activate(48_000, 2, 1, 1024).unwrap();

    let a = [1.0f32; 4];
    let b = [2.0f32; 4];
    let outs = run_graph(&mut graph, &[&a, &b], 1, 4);
    assert_eq!(outs[0], vec![1.0; 4]);
}

#[test]
fn identity_graph_duplicates_per_channel() {
    // one mono copy node, four channels: four handles
    let mut graph = load(r#"{ "nodes": [ { "label": "copy", "name": "c" } ] }"#);
    graph.activate(48_000, 4, 4, 1024).unwrap();
    assert_eq!(graph.n_handles(), 4);

    let chans: Vec<Vec<f32>> = (0..4)
        .map(|c| (0..8).map(|i| (c * 10 + i) as f32).collect())
        .collect();
    let inputs: Vec<&[f32]> = chans.iter().map(Vec::as_slice).collect();
    let outs = run_graph(&mut graph, &inputs, 4, 8);
    for (o, i) in outs.iter().zip(&chans) {
        assert_eq!(o, i);
    }
}

#[test]
fn uneven_channel_split_is_rejected() {
    // stereo into a mono-in/mono-out node with 3 outputs can't divide
    let mut graph = load(r#"{ "nodes": [ { "label": "invert", "name": "i" } ] }"#);
    assert!(matches!(
        graph.activate(48_000, 2, 3, 1024),
        Err(GraphError::BadPorts(_))
    ));
}

#[test]
fn chain_through_link() {
    let mut graph = load(
        r#"{
            "nodes": [
                { "label": "invert", "name": "a" },
                { "label": "invert", "name": "b" }
            ],
            "links": [ { "output": "a:Out", "input": "b:In" } ],
            "inputs": [ "a:In" ],
            "outputs": [ "b:Out" ]
        }"#,
    );
    graph.activate(48_000, 1, 1, 1024).unwrap();

    let input = [1.0f32, -2.0, 3.0];
    let outs = run_graph(&mut graph, &[&input], 1, 3);
    // double inversion is identity
    assert_eq!(outs[0], input);
}

#[test]
fn copy_fan_out_feeds_both_peers() {
    let mut graph = load(
        r#"{
            "nodes": [
                { "label": "copy", "name": "head" },
                { "label": "invert", "name": "l" },
                { "label": "invert", "name": "r" }
            ],
            "links": [
                { "output": "head:Out", "input": "l:In" },
                { "output": "head:Out", "input": "r:In" }
            ],
            "inputs": [ "head:In" ],
            "outputs": [ "l:Out", "r:Out" ]
        }"#,
    );
    graph.activate(48_000, 1, 2, 1024).unwrap();

    let input = [1.0f32, 2.0];
    let outs = run_graph(&mut graph, &[&input], 2, 2);
    assert_eq!(outs[0], vec![-1.0, -2.0]);
    assert_eq!(outs[1], vec![-1.0, -2.0]);
}

#[test]
fn diamond_executes_in_dependency_order() {
    // head fans out to two parallel branches that meet in a mixer; the
    // output is only correct if every link's source ran before its sink
    let mut graph = load(
        r#"{
            "nodes": [
                { "label": "copy", "name": "head" },
                { "label": "invert", "name": "a" },
                { "label": "linear", "name": "b", "control": { "Mult": 3.0 } },
                { "label": "mixer", "name": "sum" }
            ],
            "links": [
                { "output": "head:Out", "input": "a:In" },
                { "output": "head:Out", "input": "b:In" },
                { "output": "a:Out", "input": "sum:In 1" },
                { "output": "b:Out", "input": "sum:In 2" }
            ],
            "inputs": [ "head:In" ],
            "outputs": [ "sum:Out" ]
        }"#,
    );
    graph.activate(48_000, 1, 1, 1024).unwrap();

    let input = [1.0f32, 2.0, -1.0, 0.5];
    let outs = run_graph(&mut graph, &[&input], 1, 4);
    // -x + 3x = 2x on every sample
    for (o, i) in outs[0].iter().zip(&input) {
        assert!((o - 2.0 * i).abs() < 1e-6, "{o} vs {}", 2.0 * i);
    }
}

#[test]
fn null_slots_are_ignored_and_zeroed() {
    let mut graph = load(
        r#"{
            "nodes": [ { "label": "copy", "name": "c" } ],
            "inputs": [ "In", "null" ],
            "outputs": [ "Out", "null" ]
        }"#,
    );
    graph.activate(48_000, 2, 2, 1024).unwrap();

    let a = [1.0f32, 2.0];
    let b = [9.0f32, 9.0];
    let outs = run_graph(&mut graph, &[&a, &b], 2, 2);
    assert_eq!(outs[0], vec![1.0, 2.0]);
    assert_eq!(outs[1], vec![0.0, 0.0]);
}

#[test]
fn set_params_updates_controls() {
    let mut graph = load(
        r#"{
            "nodes": [ { "label": "mixer", "name": "mix" } ],
            "inputs": [ "In 1" ],
            "outputs": [ "Out" ]
        }"#,
    );
    graph.activate(48_000, 1, 1, 1024).unwrap();

    let changed = graph.set_params(&[("Gain 1", 2.0), ("nope", 1.0)]);
    assert_eq!(changed, 1);

    let input = [1.0f32; 4];
    let outs = run_graph(&mut graph, &[&input], 1, 4);
    assert_eq!(outs[0], vec![2.0; 4]);

    let props = graph.get_props();
    let gain = props.iter().find(|(n, _)| n == "mix:Gain 1").unwrap();
    assert_eq!(gain.1, 2.0);
}

#[test]
fn volumes_scale_controls() {
    let mut graph = load(
        r#"{
            "nodes": [ { "label": "mixer", "name": "mix" } ],
            "inputs": [ "In 1" ],
            "outputs": [ "Out" ],
            "input.volumes": [
                { "control": "Gain 1", "min": 0.0, "max": 1.0, "scale": "linear" }
            ]
        }"#,
    );
    graph.activate(48_000, 1, 1, 1024).unwrap();

    graph.set_volume(Direction::Input, false, &[0.5]);
    let input = [1.0f32; 4];
    let outs = run_graph(&mut graph, &[&input], 1, 4);
    assert_eq!(outs[0], vec![0.5; 4]);

    graph.set_volume(Direction::Input, true, &[0.5]);
    let outs = run_graph(&mut graph, &[&input], 1, 4);
    assert_eq!(outs[0], vec![0.0; 4]);
}

#[test]
fn delay_reports_latency() {
    let mut graph = load(
        r#"{
            "nodes": [
                { "label": "delay", "name": "d",
                  "config": { "max-delay": 1.0 },
                  "control": { "Delay (s)": 0.008 } }
            ],
            "inputs": [ "In" ],
            "outputs": [ "Out" ]
        }"#,
    );
    graph.activate(1_000, 1, 1, 1024).unwrap();

    // 0.008 s at 1 kHz is 8 samples: the first quantum is all history
    let input = vec![1.0f32; 8];
    let outs = run_graph(&mut graph, &[&input], 1, 8);
    assert_eq!(outs[0], vec![0.0; 8]);
    let outs = run_graph(&mut graph, &[&input], 1, 8);
    assert_eq!(outs[0], vec![1.0; 8]);
}

#[test]
fn deactivated_graph_outputs_silence() {
    let mut graph = load(r#"{ "nodes": [ { "label": "copy", "name": "c" } ] }"#);
    graph.activate(48_000, 1, 1, 64).unwrap();
    graph.deactivate();

    let input = [1.0f32; 4];
    let outs = run_graph(&mut graph, &[&input], 1, 4);
    assert_eq!(outs[0], vec![0.0; 4]);
}

#[test]
fn reset_restores_filter_state() {
    let mut graph = load(
        r#"{
            "nodes": [
                { "label": "bq_lowpass", "name": "lp",
                  "control": { "Freq": 1000.0, "Q": 0.7 } }
            ],
            "inputs": [ "In" ],
            "outputs": [ "Out" ]
        }"#,
    );
    graph.activate(48_000, 1, 1, 1024).unwrap();

    let input: Vec<f32> = (0..64).map(|i| (i as f32 * 0.3).sin()).collect();
    let first = run_graph(&mut graph, &[&input], 1, 64);
    graph.reset();
    let second = run_graph(&mut graph, &[&input], 1, 64);
    assert_eq!(first[0], second[0]);
}

#[test]
fn notify_to_control_link_forwards_values() {
    // sine notify drives a linear node's control input
    let mut graph = load(
        r#"{
            "nodes": [
                { "label": "sine", "name": "osc",
                  "control": { "Freq": 0.0, "Ampl": 1.0, "Offset": 2.0 } },
                { "label": "linear", "name": "lin" }
            ],
            "links": [ { "output": "osc:Notify", "input": "lin:Control" } ],
            "inputs": [ "lin:In" ],
            "outputs": [ "lin:Out" ]
        }"#,
    );
    graph.activate(48_000, 1, 1, 1024).unwrap();

    let input = [1.0f32; 4];
    run_graph(&mut graph, &[&input], 1, 4);
    // sine with zero frequency and offset 2 notifies a constant 2.0,
    // which the link forwards into the linear node's Control port
    let props = graph.get_props();
    let control = props.iter().find(|(n, _)| n == "lin:Control").unwrap();
    assert_eq!(control.1, 2.0);
}
