//! The builtin node catalog.
//!
//! Every node the original filter stack ships is available here behind the
//! regular [`Plugin`] interface: routing and arithmetic nodes, the biquad
//! family, FFT convolution, delays, oscillators, the parametric EQ, DC
//! blocking, gating, subprocess piping, HRIR spatialization and loudness
//! metering.

mod basic;
mod biquads;
mod convolver;
mod dcblock;
mod delay;
mod dynamics;
mod loudness;
mod mixer;
mod osc;
mod param_eq;
mod pipe;
mod spatializer;

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::descriptor::{
    DescriptorFlags, Instance, InstantiateCtx, NodeDescriptor, Plugin, PortDef,
};
use crate::error::PluginError;

pub use spatializer::{HrirDataset, HrirMeasurement};

/// Statically-described builtin node.
#[derive(Clone, Copy)]
pub(crate) struct Desc {
    pub name: &'static str,
    pub flags: DescriptorFlags,
    pub ports: &'static [PortDef],
    pub make: fn(&InstantiateCtx) -> Result<Box<dyn Instance>, PluginError>,
}

impl NodeDescriptor for Desc {
    fn name(&self) -> &str {
        self.name
    }

    fn flags(&self) -> DescriptorFlags {
        self.flags
    }

    fn ports(&self) -> &[PortDef] {
        self.ports
    }

    fn instantiate(&self, ctx: &InstantiateCtx) -> Result<Box<dyn Instance>, PluginError> {
        (self.make)(ctx)
    }
}

static CATALOG: &[&Desc] = &[
    &basic::COPY,
    &mixer::MIXER,
    &biquads::BQ_LOWPASS,
    &biquads::BQ_HIGHPASS,
    &biquads::BQ_BANDPASS,
    &biquads::BQ_LOWSHELF,
    &biquads::BQ_HIGHSHELF,
    &biquads::BQ_PEAKING,
    &biquads::BQ_NOTCH,
    &biquads::BQ_ALLPASS,
    &biquads::BQ_RAW,
    &convolver::CONVOLVER,
    &delay::DELAY,
    &basic::INVERT,
    &basic::CLAMP,
    &basic::LINEAR,
    &basic::RECIP,
    &basic::EXP,
    &basic::LOG,
    &basic::MULT,
    &basic::MAX,
    &basic::ABS,
    &basic::SQRT,
    &basic::DEBUG,
    &osc::SINE,
    &osc::RAMP,
    &param_eq::PARAM_EQ,
    &dcblock::DCBLOCK,
    &dynamics::NOISEGATE,
    &dynamics::ZERORAMP,
    &pipe::PIPE,
    &spatializer::SPATIALIZER,
    &loudness::EBUR128,
    &loudness::LUFS2GAIN,
];

/// The `builtin` plugin loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPlugin;

impl BuiltinPlugin {
    /// Create the loader.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Labels of every node in the catalog.
    #[must_use]
    pub fn labels() -> Vec<&'static str> {
        CATALOG.iter().map(|d| d.name).collect()
    }
}

impl Plugin for BuiltinPlugin {
    fn make_descriptor(&self, label: &str) -> Result<Arc<dyn NodeDescriptor>, PluginError> {
        CATALOG
            .iter()
            .find(|d| d.name == label)
            .map(|d| Arc::new(**d) as Arc<dyn NodeDescriptor>)
            .ok_or_else(|| PluginError::UnknownLabel(label.to_owned()))
    }
}

/// Deserialize a required config section.
pub(crate) fn require_config<T: DeserializeOwned>(
    node: &'static str,
    ctx: &InstantiateCtx,
) -> Result<T, PluginError> {
    let value = ctx
        .config
        .as_ref()
        .ok_or(PluginError::MissingConfig(node))?;
    serde_json::from_value(value.clone())
        .map_err(|e| PluginError::bad_config(format!("{node}: {e}")))
}

/// Deserialize an optional config section, defaulting when absent.
pub(crate) fn optional_config<T: DeserializeOwned + Default>(
    node: &'static str,
    ctx: &InstantiateCtx,
) -> Result<T, PluginError> {
    match ctx.config.as_ref() {
        None => Ok(T::default()),
        Some(v) => {
            serde_json::from_value(v.clone()).map_err(|e| PluginError::bad_config(format!("{node}: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_unique_labels() {
        let labels = BuiltinPlugin::labels();
        let mut sorted = labels.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), labels.len());
        assert!(labels.len() >= 30, "catalog holds the full node set");
    }

    #[test]
    fn unknown_label_is_an_error() {
        let plugin = BuiltinPlugin::new();
        assert!(matches!(
            plugin.make_descriptor("nope"),
            Err(PluginError::UnknownLabel(_))
        ));
    }

    #[test]
    fn port_indices_are_dense(){
        let plugin = BuiltinPlugin::new();
        for label in BuiltinPlugin::labels() {
            let desc = plugin.make_descriptor(label).unwrap();
            for (i, port) in desc.ports().iter().enumerate() {
                assert_eq!(port.index as usize, i, "{label} port {i}");
            }
        }
    }
}
