//! Graph definition documents.
//!
//! A graph is described by a structured document with `nodes`, `links`,
//! external `inputs`/`outputs` name lists and optional per-direction
//! volume groups. Both JSON and TOML front ends deserialize into the same
//! structures; node `config` blobs stay unparsed until the node's own
//! instantiation interprets them.
//!
//! Port references use the syntax `"<node>:<port>"`, `"<port>"`,
//! `"<node>:<index>"` or `"<index>"`, where a bare name resolves against
//! the contextual default node (first node for inputs, last for outputs).
//! The string `"null"` in `inputs`/`outputs` reserves an ignored channel
//! slot.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::GraphError;

/// A full graph definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    /// Processing nodes, in declaration order.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Directed port links.
    #[serde(default)]
    pub links: Vec<LinkConfig>,

    /// External input port names; `"null"` reserves an ignored slot.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// External output port names; `"null"` produces silence.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Volume controls applied to the input side.
    #[serde(default, rename = "input.volumes")]
    pub input_volumes: Vec<VolumeConfig>,

    /// Volume controls applied to the output side.
    #[serde(default, rename = "output.volumes")]
    pub output_volumes: Vec<VolumeConfig>,
}

impl GraphConfig {
    /// Parse a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, GraphError> {
        serde_json::from_str(s).map_err(|e| GraphError::Parse(e.to_string()))
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, GraphError> {
        toml::from_str(s).map_err(|e| GraphError::Parse(e.to_string()))
    }
}

/// One node of the graph.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Loader kind: `builtin`, `ladspa`, `lv2`, `sofa`, `ebur128`,
    /// `ffmpeg` or `onnx`.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,

    /// Instance name used in port references; defaults to the label.
    #[serde(default)]
    pub name: Option<String>,

    /// Loader-specific plugin locator (path, bundle URI, ...); unused by
    /// the builtin loader.
    #[serde(default)]
    pub plugin: Option<String>,

    /// Descriptor label within the plugin.
    pub label: String,

    /// Unparsed node configuration.
    #[serde(default)]
    pub config: Option<serde_json::Value>,

    /// Initial control values, by port name.
    #[serde(default)]
    pub control: BTreeMap<String, f32>,
}

fn default_kind() -> String {
    "builtin".to_owned()
}

impl NodeConfig {
    /// Shorthand for a builtin node without config.
    #[must_use]
    pub fn builtin(label: &str, name: &str) -> Self {
        Self {
            kind: default_kind(),
            name: Some(name.to_owned()),
            plugin: None,
            label: label.to_owned(),
            config: None,
            control: BTreeMap::new(),
        }
    }

    /// Effective instance name.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.label)
    }
}

/// One directed link between an output and an input port.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// Source port reference.
    pub output: String,
    /// Destination port reference.
    pub input: String,
}

/// Volume scale curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeScale {
    /// The channel volume maps linearly into `[min, max]`.
    #[default]
    Linear,
    /// The cube root of the channel volume maps into `[min, max]`.
    Cubic,
}

/// One volume-controlled port.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeConfig {
    /// Control port reference on the first (input side) or last (output
    /// side) node.
    pub control: String,

    /// Control value at volume 0.
    #[serde(default)]
    pub min: f32,

    /// Control value at volume 1.
    #[serde(default = "default_max")]
    pub max: f32,

    /// Scale curve.
    #[serde(default)]
    pub scale: VolumeScale,
}

fn default_max() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_document() {
        let cfg = GraphConfig::from_json_str(
            r#"{
                "nodes": [
                    { "type": "builtin", "label": "mixer", "name": "mix",
                      "control": { "Gain 1": 0.5 } }
                ],
                "links": [],
                "inputs": [ "In 1", "null" ],
                "outputs": [ "Out" ],
                "input.volumes": [
                    { "control": "Gain 1", "scale": "cubic" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].instance_name(), "mix");
        assert_eq!(cfg.nodes[0].control["Gain 1"], 0.5);
        assert_eq!(cfg.inputs, vec!["In 1", "null"]);
        assert_eq!(cfg.input_volumes[0].scale, VolumeScale::Cubic);
        assert_eq!(cfg.input_volumes[0].max, 1.0);
    }

    #[test]
    fn parses_toml_document() {
        let cfg = GraphConfig::from_toml_str(
            r#"
                inputs = ["In"]
                outputs = ["Out"]

                [[nodes]]
                label = "copy"

                [[links]]
                output = "src:Out"
                input = "dst:In"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.nodes[0].kind, "builtin");
        assert_eq!(cfg.nodes[0].instance_name(), "copy");
        assert_eq!(cfg.links.len(), 1);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(GraphConfig::from_json_str(r#"{ "nodez": [] }"#).is_err());
    }
}
