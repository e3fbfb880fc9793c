//! Plugin model and builtin node catalog for the cadena filter graph.
//!
//! A [`Plugin`] hands out [`NodeDescriptor`]s by label; a descriptor lists
//! its [`PortDef`]s and instantiates [`Instance`]s, one per handle, that
//! the graph drives on the real-time thread. The contract is narrow on
//! purpose: ports carry direction, kind, hints and a control range, and an
//! instance only ever sees the buffers bound to its ports for the current
//! quantum.
//!
//! The [`builtin`] module provides the fixed catalog of audio nodes
//! (mixers, biquads, convolvers, delays, meters, spatialization, ...)
//! behind the same interface external loaders use.
//!
//! # Example
//!
//! ```
//! use cadena_plugin::{builtin::BuiltinPlugin, InstantiateCtx, Plugin};
//!
//! let plugin = BuiltinPlugin::new();
//! let desc = plugin.make_descriptor("mixer").unwrap();
//! let ctx = InstantiateCtx::new(48_000, 0, None);
//! let _instance = desc.instantiate(&ctx).unwrap();
//! ```

pub mod builtin;
pub mod descriptor;
pub mod error;

pub use descriptor::{
    DescriptorFlags, Instance, InstantiateCtx, NodeDescriptor, Plugin, PortDef, PortFlags,
    PortHints, Ports,
};
pub use error::PluginError;
