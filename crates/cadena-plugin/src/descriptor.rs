//! The plugin/descriptor/port/instance contract.
//!
//! Nodes are described statically ([`PortDef`] carries direction, kind,
//! hints and a control range) and instantiated per handle. At run time the
//! graph binds buffers to ports and passes them in [`Ports`]; instances
//! never hold pointers into the graph between quanta.
//!
//! Port arrays in [`Ports`] are ordered per kind: `audio_in[i]` is the
//! node's i-th audio input port in port-index order, `control[i]` its i-th
//! input control, and so on. The global `index` in [`PortDef`] only names
//! ports in configuration and property paths.

use std::sync::Arc;

use cadena_dsp::Dsp;

use crate::error::PluginError;

bitflags::bitflags! {
    /// Direction and kind of a port.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortFlags: u32 {
        /// Data flows into the node.
        const INPUT = 1 << 0;
        /// Data flows out of the node.
        const OUTPUT = 1 << 1;
        /// Sample buffer port.
        const AUDIO = 1 << 2;
        /// Single-value control port.
        const CONTROL = 1 << 3;
        /// The port tolerates running without a bound buffer.
        const NULL_DATA = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Interpretation hints on a control port.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortHints: u32 {
        /// Value is a toggle; anything above 0.5 reads as true.
        const BOOLEAN = 1 << 0;
        /// Value scales with the session sample rate when exposed.
        const SAMPLE_RATE = 1 << 1;
        /// Value is an integer count.
        const INTEGER = 1 << 2;
        /// Notify port publishing the node's latency in samples.
        const LATENCY = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Flags on a descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DescriptorFlags: u32 {
        /// Every port accepts a missing buffer.
        const SUPPORTS_NULL_DATA = 1 << 0;
        /// Input fan-out copy: when this node heads the graph, its linked
        /// peers become the external input slots.
        const COPY = 1 << 1;
    }
}

/// Static description of one port.
#[derive(Debug, Clone, Copy)]
pub struct PortDef {
    /// Global port index, stable for config and property naming.
    pub index: u32,
    /// Port name as used in link and property paths.
    pub name: &'static str,
    /// Direction and kind.
    pub flags: PortFlags,
    /// Interpretation hints.
    pub hints: PortHints,
    /// Default control value.
    pub def: f32,
    /// Minimum control value.
    pub min: f32,
    /// Maximum control value.
    pub max: f32,
}

impl PortDef {
    /// An audio input port.
    #[must_use]
    pub const fn audio_in(index: u32, name: &'static str) -> Self {
        Self {
            index,
            name,
            flags: PortFlags::INPUT.union(PortFlags::AUDIO),
            hints: PortHints::empty(),
            def: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }

    /// An audio output port.
    #[must_use]
    pub const fn audio_out(index: u32, name: &'static str) -> Self {
        Self {
            index,
            name,
            flags: PortFlags::OUTPUT.union(PortFlags::AUDIO),
            hints: PortHints::empty(),
            def: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }

    /// An input control port with range and default.
    #[must_use]
    pub const fn control_in(index: u32, name: &'static str, def: f32, min: f32, max: f32) -> Self {
        Self {
            index,
            name,
            flags: PortFlags::INPUT.union(PortFlags::CONTROL),
            hints: PortHints::empty(),
            def,
            min,
            max,
        }
    }

    /// An output (notify) control port.
    #[must_use]
    pub const fn notify(index: u32, name: &'static str) -> Self {
        Self {
            index,
            name,
            flags: PortFlags::OUTPUT.union(PortFlags::CONTROL),
            hints: PortHints::empty(),
            def: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }

    /// Attach hints.
    #[must_use]
    pub const fn with_hints(mut self, hints: PortHints) -> Self {
        self.hints = hints;
        self
    }

    /// Whether this is an audio input.
    #[must_use]
    pub fn is_audio_in(&self) -> bool {
        self.flags.contains(PortFlags::INPUT | PortFlags::AUDIO)
    }

    /// Whether this is an audio output.
    #[must_use]
    pub fn is_audio_out(&self) -> bool {
        self.flags.contains(PortFlags::OUTPUT | PortFlags::AUDIO)
    }

    /// Whether this is an input control.
    #[must_use]
    pub fn is_control_in(&self) -> bool {
        self.flags.contains(PortFlags::INPUT | PortFlags::CONTROL)
    }

    /// Whether this is an output control.
    #[must_use]
    pub fn is_notify(&self) -> bool {
        self.flags.contains(PortFlags::OUTPUT | PortFlags::CONTROL)
    }
}

/// Everything a descriptor needs to build one instance.
#[derive(Debug, Clone)]
pub struct InstantiateCtx {
    /// Session sample rate in Hz.
    pub sample_rate: u32,
    /// Handle index; per-channel nodes use it to pick their channel.
    pub index: usize,
    /// Unparsed node config from the graph definition.
    pub config: Option<serde_json::Value>,
    /// Kernel table shared by the graph.
    pub dsp: Dsp,
    /// Upper bound on `n_samples` per run.
    pub quantum_limit: usize,
}

impl InstantiateCtx {
    /// Context with the defaults the tests and simple embedders use.
    #[must_use]
    pub fn new(sample_rate: u32, index: usize, config: Option<serde_json::Value>) -> Self {
        Self {
            sample_rate,
            index,
            config,
            dsp: Dsp::new(),
            quantum_limit: 8192,
        }
    }
}

/// Buffers bound to an instance's ports for one quantum.
///
/// Arrays are ordered per kind (see the module docs). Audio slots are
/// `None` when the port is unlinked and allows null data.
pub struct Ports<'a, 'b> {
    /// One slot per audio input port.
    pub audio_in: &'a [Option<&'b [f32]>],
    /// One slot per audio output port.
    pub audio_out: &'a mut [Option<&'b mut [f32]>],
    /// Current value of each input control port.
    pub control: &'a [f32],
    /// Value slots of each output control port.
    pub notify: &'a mut [f32],
}

/// One live node instance.
///
/// `run` executes on the real-time thread and must not allocate, block or
/// perform I/O; everything it needs is set up at instantiation.
pub trait Instance: Send {
    /// Process one quantum on the bound port buffers.
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize);

    /// Called once before the first run and after every reset.
    fn activate(&mut self) {}

    /// Called when the graph stops using the instance.
    fn deactivate(&mut self) {}

    /// Called on the main thread after any input control value changed.
    fn control_changed(&mut self, _control: &[f32]) {}

    /// Latency this instance introduces, in samples.
    fn latency_samples(&self) -> Option<f32> {
        None
    }

    /// Whether the instance wants [`Instance::work`] invoked on the main
    /// thread. Polled by the graph after each run on the real-time thread;
    /// a `true` result is queued and serviced outside the audio path.
    fn wants_work(&self) -> bool {
        false
    }

    /// Main-thread work (allocation, I/O, freeing retired resources)
    /// requested from the real-time path via [`Instance::wants_work`].
    fn work(&mut self) {}
}

/// Static description of a node type.
pub trait NodeDescriptor: Send + Sync {
    /// Label under which the plugin exports this node.
    fn name(&self) -> &str;

    /// Descriptor flags.
    fn flags(&self) -> DescriptorFlags;

    /// All ports, in index order.
    fn ports(&self) -> &[PortDef];

    /// Build one instance.
    fn instantiate(&self, ctx: &InstantiateCtx) -> Result<Box<dyn Instance>, PluginError>;
}

/// A loader that resolves labels to descriptors.
pub trait Plugin: Send + Sync {
    /// Look up a descriptor by label.
    fn make_descriptor(&self, label: &str) -> Result<Arc<dyn NodeDescriptor>, PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_constructors_set_flags() {
        let p = PortDef::audio_in(1, "In");
        assert!(p.is_audio_in());
        assert!(!p.is_audio_out());

        let p = PortDef::control_in(2, "Freq", 440.0, 0.0, 20_000.0);
        assert!(p.is_control_in());
        assert_eq!(p.def, 440.0);

        let p = PortDef::notify(3, "latency").with_hints(PortHints::LATENCY);
        assert!(p.is_notify());
        assert!(p.hints.contains(PortHints::LATENCY));
    }
}
