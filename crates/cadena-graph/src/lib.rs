//! Cadena graph - a real-time directed graph of audio processing nodes.
//!
//! A graph is loaded from a structured definition ([`GraphConfig`], JSON
//! or TOML), resolves its nodes through a [`PluginRegistry`], and is
//! instantiated once per handle to match the requested channel topology.
//! Audio flows through zero-copy buffer bindings computed at activation;
//! the run path is allocation-free and executes nodes in topological
//! order, sample-accurately, on the caller's real-time thread.
//!
//! # Threads
//!
//! - the real-time thread calls [`FilterGraph::run`] and nothing else;
//! - the main thread owns the rest of the lifecycle (load, activate,
//!   deactivate, reset, controls, volumes) and services
//!   [`FilterGraph::process_work`];
//! - instances request main-thread work through the bounded
//!   [`work::WorkQueue`], never by blocking the audio path.
//!
//! # Example
//!
//! ```
//! use cadena_graph::{FilterGraph, GraphConfig, PluginRegistry};
//!
//! let config = GraphConfig::from_json_str(
//!     r#"{ "nodes": [ { "label": "copy" } ] }"#,
//! ).unwrap();
//! let registry = PluginRegistry::new();
//! let mut graph = FilterGraph::load(&config, &registry).unwrap();
//! graph.activate(48_000, 1, 1, 1024).unwrap();
//!
//! let input = [1.0f32, 2.0, 3.0, 4.0];
//! let mut output = [0.0f32; 4];
//! {
//!     let ins = [Some(&input[..])];
//!     let mut out_slot: Option<&mut [f32]> = Some(&mut output);
//!     graph.run(&ins, std::slice::from_mut(&mut out_slot), 4);
//! }
//! assert_eq!(output, input);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod registry;
pub mod work;

pub use config::{GraphConfig, LinkConfig, NodeConfig, VolumeConfig, VolumeScale};
pub use error::GraphError;
pub use graph::{Direction, FilterGraph, PropInfo};
pub use registry::PluginRegistry;
