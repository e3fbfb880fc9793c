//! Plugin loader registry.
//!
//! Loaders are named by the `type` field of a node config and all hand
//! out descriptors through the same [`Plugin`] interface. The builtin
//! loader is always present (it also serves the `sofa` and `ebur128`
//! names, whose nodes live in the builtin catalog here); foreign-ABI
//! loaders can be registered by the embedder and otherwise report
//! `NotSupported`.

use std::collections::HashMap;
use std::sync::Arc;

use cadena_plugin::builtin::BuiltinPlugin;
use cadena_plugin::{NodeDescriptor, Plugin, PluginError};

/// Maps loader names to plugin implementations.
pub struct PluginRegistry {
    loaders: HashMap<String, Arc<dyn Plugin>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Registry with the builtin loader and stubs for the foreign kinds.
    #[must_use]
    pub fn new() -> Self {
        let mut loaders: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
        let builtin: Arc<dyn Plugin> = Arc::new(BuiltinPlugin::new());
        loaders.insert("builtin".to_owned(), Arc::clone(&builtin));
        loaders.insert("sofa".to_owned(), Arc::clone(&builtin));
        loaders.insert("ebur128".to_owned(), builtin);
        for kind in ["ladspa", "lv2", "ffmpeg", "onnx"] {
            loaders.insert(kind.to_owned(), Arc::new(External { kind }));
        }
        Self { loaders }
    }

    /// Register (or replace) a loader under a name.
    pub fn register(&mut self, kind: &str, plugin: Arc<dyn Plugin>) {
        self.loaders.insert(kind.to_owned(), plugin);
    }

    /// Resolve a descriptor through the named loader.
    pub fn load(&self, kind: &str, label: &str) -> Result<Arc<dyn NodeDescriptor>, PluginError> {
        let loader = self
            .loaders
            .get(kind)
            .ok_or_else(|| PluginError::UnknownLabel(format!("{kind}:{label}")))?;
        loader.make_descriptor(label)
    }
}

/// Placeholder for loaders that live outside this crate.
struct External {
    kind: &'static str,
}

impl Plugin for External {
    fn make_descriptor(&self, label: &str) -> Result<Arc<dyn NodeDescriptor>, PluginError> {
        tracing::warn!(kind = self.kind, label, "no loader registered for this plugin kind");
        Err(PluginError::NotSupported(self.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_labels_resolve() {
        let reg = PluginRegistry::new();
        assert!(reg.load("builtin", "mixer").is_ok());
        assert!(reg.load("sofa", "spatializer").is_ok());
        assert!(reg.load("ebur128", "ebur128").is_ok());
    }

    #[test]
    fn foreign_kinds_are_stubbed() {
        let reg = PluginRegistry::new();
        assert!(matches!(
            reg.load("ladspa", "g2reverb"),
            Err(PluginError::NotSupported("ladspa"))
        ));
        assert!(matches!(
            reg.load("no-such-kind", "x"),
            Err(PluginError::UnknownLabel(_))
        ));
    }
}
