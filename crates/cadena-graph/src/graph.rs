//! The filter graph: load, setup, activate, run.
//!
//! Nodes, ports and links live in index-addressed arenas; a link is a pair
//! of `(node, direction, kind, position)` references, so the topology
//! carries no pointers and the schedule is a flat list of steps. Setup
//! determines the handle multiplicity `n_hndl` from the requested channel
//! count, builds the external port tables (duplicated per handle) and
//! computes the topological order; activation instantiates every
//! descriptor once per handle, binds buffers, and precompiles the
//! per-step port bindings the real-time thread consumes.
//!
//! `run` is infallible and allocation-free: every buffer was placed in the
//! arena at activation, step scratch lives in fixed stack arrays, and
//! main-thread work requested by instances travels over the bounded
//! [`WorkQueue`].

use std::sync::Arc;

use cadena_dsp::{AlignedBuf, Dsp};
use cadena_plugin::{
    DescriptorFlags, Instance, InstantiateCtx, NodeDescriptor, PortFlags, PortHints, Ports,
};

use crate::config::{GraphConfig, VolumeScale};
use crate::error::GraphError;
use crate::registry::PluginRegistry;
use crate::work::{WorkItem, WorkQueue};

/// Upper bound on handle multiplicity.
const MAX_HNDL: usize = 64;
/// Upper bound on ports per kind per node (fixed run-time scratch).
const MAX_PORTS: usize = 32;
/// Upper bound on volume channels.
const MAX_CHANNELS: usize = 64;
/// Depth of the RT-to-main work queue.
const WORK_DEPTH: usize = 64;

/// External side of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The capture/source side (first node).
    Input,
    /// The playback/sink side (last node).
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortDir {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortKind {
    Audio,
    Control,
}

/// Typed index of one port: node, direction, kind and the position within
/// that kind's partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortRef {
    node: usize,
    dir: PortDir,
    kind: PortKind,
    pos: usize,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    output: PortRef,
    input: PortRef,
}

struct NodeState {
    name: String,
    desc: Arc<dyn NodeDescriptor>,
    config: Option<serde_json::Value>,

    /// Global port indices per kind partition, in index order.
    audio_in: Vec<usize>,
    audio_out: Vec<usize>,
    control_in: Vec<usize>,
    notify: Vec<usize>,

    /// Initial control values: port defaults with the config `control`
    /// section applied.
    control_init: Vec<f32>,
    /// Whether any initial value differs from the port default.
    control_changed: bool,

    /// Inbound link per audio input position.
    in_links: Vec<Option<usize>>,
    /// Inbound link per control input position.
    ctrl_links: Vec<Option<usize>>,
    /// Outbound link count per audio output position.
    out_links: Vec<usize>,
    /// Outbound link count per notify position.
    notify_links: Vec<usize>,

    /// External slot claims, used for double-assignment detection.
    in_external: Vec<Option<usize>>,
    out_external: Vec<Option<usize>>,

    /// Notify position carrying the latency hint.
    latency_index: Option<usize>,

    /// Upstream dependency count (audio and control links).
    n_deps: usize,
    /// Head node consumed by COPY fan-out; holds no instances.
    disabled: bool,

    // per-handle runtime state
    instances: Vec<Box<dyn Instance>>,
    controls: Vec<Vec<f32>>,
    notifies: Vec<Vec<f32>>,

    min_latency: f32,
    max_latency: f32,
}

impl NodeState {
    fn port_name(&self, global: usize) -> &str {
        self.desc.ports()[global].name
    }

    fn allows_null(&self, global: usize) -> bool {
        self.desc.flags().contains(DescriptorFlags::SUPPORTS_NULL_DATA)
            || self.desc.ports()[global]
                .flags
                .contains(PortFlags::NULL_DATA)
    }
}

/// One external input slot; a slot may fan out to several plugin ports
/// (the COPY mechanism). Empty targets mean the channel is ignored.
#[derive(Debug, Clone)]
struct ExtIn {
    handle: usize,
    targets: Vec<(usize, usize)>,
}

/// One external output slot; no source means the channel is zeroed.
#[derive(Debug, Clone, Copy)]
struct ExtOut {
    handle: usize,
    source: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Copy)]
enum InBind {
    /// Caller buffer for this external slot (silence when absent).
    External(usize),
    /// Arena buffer filled by the upstream link.
    Arena(usize),
    /// Shared silence.
    Silence,
    /// Port tolerates no buffer.
    Null,
}

#[derive(Debug, Clone, Copy)]
enum OutBind {
    /// Caller buffer for this external slot, with an arena fallback when
    /// the caller passes none.
    External { slot: usize, fallback: usize },
    /// Arena buffer (link source or discard).
    Arena(usize),
    /// Port tolerates no buffer.
    Null,
}

/// One precompiled unit of work: a node handle with resolved bindings.
struct Step {
    node: usize,
    handle: usize,
    in_binds: Vec<InBind>,
    out_binds: Vec<OutBind>,
    /// Per control position: upstream notify to copy before running.
    ctrl_from: Vec<Option<(usize, usize)>>,
}

#[derive(Debug, Default)]
struct VolumeGroup {
    ports: Vec<(usize, usize)>,
    min: Vec<f32>,
    max: Vec<f32>,
    scale: Vec<VolumeScale>,
    mute: bool,
    volumes: Vec<f32>,
}

/// Control-port metadata exposed to embedders.
#[derive(Debug, Clone, PartialEq)]
pub struct PropInfo {
    /// Qualified `node:port` name.
    pub name: String,
    /// Default value (rate-scaled when hinted).
    pub def: f32,
    /// Minimum (rate-scaled when hinted).
    pub min: f32,
    /// Maximum (rate-scaled when hinted).
    pub max: f32,
    /// Value is a toggle.
    pub is_boolean: bool,
    /// Value is an integer count.
    pub is_integer: bool,
}

/// A loaded filter graph.
///
/// Lifecycle: [`FilterGraph::load`] → [`FilterGraph::activate`] →
/// [`FilterGraph::run`] (on the real-time thread) with
/// [`FilterGraph::process_work`] serviced from the main thread, then
/// [`FilterGraph::deactivate`].
pub struct FilterGraph {
    dsp: Dsp,
    nodes: Vec<NodeState>,
    links: Vec<Link>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    volumes: [VolumeGroup; 2],

    setup_done: bool,
    n_inputs: usize,
    n_outputs: usize,
    n_hndl: usize,
    ext_in: Vec<ExtIn>,
    ext_out: Vec<ExtOut>,
    order: Vec<usize>,

    activated: bool,
    rate: u32,
    quantum_limit: usize,
    arena: Vec<Option<AlignedBuf>>,
    /// Arena index per `[node][audio_out pos][handle]`; `usize::MAX` when
    /// the port runs unbuffered.
    arena_idx: Vec<Vec<Vec<usize>>>,
    steps: Vec<Step>,
    silence: AlignedBuf,

    min_latency: f32,
    max_latency: f32,

    work: WorkQueue,
}

impl FilterGraph {
    /// Load a graph definition: resolve descriptors, apply initial
    /// controls, resolve links and volume groups.
    pub fn load(config: &GraphConfig, registry: &PluginRegistry) -> Result<Self, GraphError> {
        if config.nodes.is_empty() {
            return Err(GraphError::BadConfig("graph has no nodes".into()));
        }

        let dsp = Dsp::new();
        let mut graph = Self {
            dsp,
            nodes: Vec::new(),
            links: Vec::new(),
            input_names: config.inputs.clone(),
            output_names: config.outputs.clone(),
            volumes: [VolumeGroup::default(), VolumeGroup::default()],
            setup_done: false,
            n_inputs: 0,
            n_outputs: 0,
            n_hndl: 0,
            ext_in: Vec::new(),
            ext_out: Vec::new(),
            order: Vec::new(),
            activated: false,
            rate: 0,
            quantum_limit: 0,
            arena: Vec::new(),
            arena_idx: Vec::new(),
            steps: Vec::new(),
            silence: AlignedBuf::new(0),
            min_latency: 0.0,
            max_latency: 0.0,
            work: WorkQueue::new(WORK_DEPTH),
        };

        for nc in &config.nodes {
            let name = nc.instance_name().to_owned();
            if graph.find_node(&name).is_some() {
                return Err(GraphError::BadConfig(format!("duplicate node name '{name}'")));
            }
            let desc = registry.load(&nc.kind, &nc.label)?;

            let mut audio_in = Vec::new();
            let mut audio_out = Vec::new();
            let mut control_in = Vec::new();
            let mut notify = Vec::new();
            let mut control_init = Vec::new();
            let mut latency_index = None;
            for (global, port) in desc.ports().iter().enumerate() {
                if port.is_audio_in() {
                    audio_in.push(global);
                } else if port.is_audio_out() {
                    audio_out.push(global);
                } else if port.is_control_in() {
                    control_in.push(global);
                    control_init.push(port.def);
                } else if port.is_notify() {
                    if port.hints.contains(PortHints::LATENCY) {
                        latency_index = Some(notify.len());
                    }
                    notify.push(global);
                }
            }
            if audio_in.len() > MAX_PORTS || audio_out.len() > MAX_PORTS {
                return Err(GraphError::NoSpace(format!(
                    "node '{name}' has too many ports"
                )));
            }

            let node = NodeState {
                name,
                config: nc.config.clone(),
                in_links: vec![None; audio_in.len()],
                ctrl_links: vec![None; control_in.len()],
                out_links: vec![0; audio_out.len()],
                notify_links: vec![0; notify.len()],
                in_external: vec![None; audio_in.len()],
                out_external: vec![None; audio_out.len()],
                audio_in,
                audio_out,
                control_in,
                notify,
                control_init,
                control_changed: false,
                latency_index,
                n_deps: 0,
                disabled: false,
                instances: Vec::new(),
                controls: Vec::new(),
                notifies: Vec::new(),
                min_latency: 0.0,
                max_latency: 0.0,
                desc,
            };

            let node_idx = graph.nodes.len();
            graph.nodes.push(node);

            // initial control values from the config
            for (cname, value) in &nc.control {
                let port = graph
                    .find_port(node_idx, cname, PortDir::Input, PortKind::Control)
                    .ok_or_else(|| {
                        GraphError::BadLink(format!("unknown control port '{cname}'"))
                    })?;
                let node = &mut graph.nodes[node_idx];
                if node.control_init[port.pos] != *value {
                    node.control_init[port.pos] = *value;
                    node.control_changed = true;
                }
            }
        }

        for lc in &config.links {
            graph.add_link(&lc.output, &lc.input)?;
        }

        for (dir, volumes) in [
            (Direction::Input, &config.input_volumes),
            (Direction::Output, &config.output_volumes),
        ] {
            for vc in volumes {
                graph.add_volume(dir, &vc.control, vc.min, vc.max, vc.scale)?;
            }
        }

        Ok(graph)
    }

    fn find_node(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Resolve a port reference.
    ///
    /// Accepted forms: `node:port`, `node:index`, `port`, `index`; a bare
    /// name resolves on `default_node`, and a colon that does not name a
    /// node is treated as part of the port name.
    fn find_port(
        &self,
        default_node: usize,
        name: &str,
        dir: PortDir,
        kind: PortKind,
    ) -> Option<PortRef> {
        let (node_idx, port_name) = match name.split_once(':') {
            Some((node_name, rest)) => match self.find_node(node_name) {
                Some(idx) => (idx, rest),
                None => (default_node, name),
            },
            None => (default_node, name),
        };

        let node = &self.nodes[node_idx];
        let partition = match (dir, kind) {
            (PortDir::Input, PortKind::Audio) => &node.audio_in,
            (PortDir::Output, PortKind::Audio) => &node.audio_out,
            (PortDir::Input, PortKind::Control) => &node.control_in,
            (PortDir::Output, PortKind::Control) => &node.notify,
        };
        let by_index: Option<usize> = port_name.parse().ok();

        for (pos, &global) in partition.iter().enumerate() {
            if by_index == Some(pos) || node.port_name(global) == port_name {
                return Some(PortRef {
                    node: node_idx,
                    dir,
                    kind,
                    pos,
                });
            }
        }
        None
    }

    fn add_link(&mut self, output: &str, input: &str) -> Result<(), GraphError> {
        let first = 0;
        let last = self.nodes.len() - 1;

        // audio ports first, then the control/notify pair
        let mut out_port = self.find_port(first, output, PortDir::Output, PortKind::Audio);
        let mut in_port = self.find_port(last, input, PortDir::Input, PortKind::Audio);
        if out_port.is_none() && in_port.is_none() {
            out_port = self.find_port(first, output, PortDir::Output, PortKind::Control);
            in_port = self.find_port(last, input, PortDir::Input, PortKind::Control);
        }
        let out_port =
            out_port.ok_or_else(|| GraphError::BadLink(format!("unknown output port '{output}'")))?;
        let in_port =
            in_port.ok_or_else(|| GraphError::BadLink(format!("unknown input port '{input}'")))?;
        if out_port.kind != in_port.kind {
            return Err(GraphError::BadLink(format!(
                "cannot link '{output}' to '{input}': port kinds differ"
            )));
        }

        let in_node = &mut self.nodes[in_port.node];
        let slot = match in_port.kind {
            PortKind::Audio => &mut in_node.in_links[in_port.pos],
            PortKind::Control => &mut in_node.ctrl_links[in_port.pos],
        };
        if slot.is_some() {
            return Err(GraphError::Busy(format!(
                "can't have more than 1 link to '{input}', use a mixer"
            )));
        }
        *slot = Some(self.links.len());
        in_node.n_deps += 1;

        let out_node = &mut self.nodes[out_port.node];
        match out_port.kind {
            PortKind::Audio => out_node.out_links[out_port.pos] += 1,
            PortKind::Control => out_node.notify_links[out_port.pos] += 1,
        }

        tracing::debug!(
            from = %output,
            to = %input,
            "linked {}:{} -> {}:{}",
            self.nodes[out_port.node].name,
            out_port.pos,
            self.nodes[in_port.node].name,
            in_port.pos,
        );
        self.links.push(Link {
            output: out_port,
            input: in_port,
        });
        Ok(())
    }

    fn add_volume(
        &mut self,
        dir: Direction,
        control: &str,
        min: f32,
        max: f32,
        scale: VolumeScale,
    ) -> Result<(), GraphError> {
        let default_node = match dir {
            Direction::Input => 0,
            Direction::Output => self.nodes.len() - 1,
        };
        let port = self
            .find_port(default_node, control, PortDir::Input, PortKind::Control)
            .ok_or_else(|| GraphError::BadLink(format!("unknown control port '{control}'")))?;

        let group = &mut self.volumes[dir as usize];
        if group.ports.len() >= MAX_CHANNELS {
            return Err(GraphError::NoSpace("too many volume controls".into()));
        }
        tracing::info!(
            ?dir,
            control,
            min,
            max,
            ?scale,
            "volume control on {}",
            self.nodes[port.node].name
        );
        group.ports.push((port.node, port.pos));
        group.min.push(min);
        group.max.push(max);
        group.scale.push(scale);
        Ok(())
    }

    /// Number of external input channels after setup.
    #[must_use]
    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    /// Number of external output channels after setup.
    #[must_use]
    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    /// Handle multiplicity after setup.
    #[must_use]
    pub fn n_handles(&self) -> usize {
        self.n_hndl
    }

    /// Accumulated graph latency `(min, max)` in samples.
    #[must_use]
    pub fn latency(&self) -> (f32, f32) {
        (self.min_latency, self.max_latency)
    }

    fn setup(&mut self) -> Result<(), GraphError> {
        self.unsetup();

        let first = 0;
        let last = self.nodes.len() - 1;

        let n_input = if self.input_names.is_empty() {
            self.nodes[first].audio_in.len()
        } else {
            self.input_names.len()
        };
        let n_output = if self.output_names.is_empty() {
            self.nodes[last].audio_out.len()
        } else {
            self.output_names.len()
        };
        if n_input == 0 {
            return Err(GraphError::BadPorts("no inputs".into()));
        }
        if n_output == 0 {
            return Err(GraphError::BadPorts("no outputs".into()));
        }

        // unconnected ports are tolerated only when nothing was named
        // explicitly and the edge nodes accept missing buffers
        let allow_unused = self.input_names.is_empty()
            && self.output_names.is_empty()
            && self.nodes[first]
                .desc
                .flags()
                .contains(DescriptorFlags::SUPPORTS_NULL_DATA)
            && self.nodes[last]
                .desc
                .flags()
                .contains(DescriptorFlags::SUPPORTS_NULL_DATA);

        if self.n_inputs == 0 {
            self.n_inputs = n_input;
        }
        let mut n_hndl = self.n_inputs / n_input;
        if self.n_outputs == 0 {
            self.n_outputs = n_output * n_hndl;
        }
        if n_hndl != self.n_outputs / n_output {
            return Err(GraphError::BadPorts(format!(
                "the input stream has {} ports and the filter has {n_input} inputs; \
                 the output stream has {} ports and the filter has {n_output} outputs; \
                 {}/{n_input} != {}/{n_output}",
                self.n_inputs, self.n_outputs, self.n_inputs, self.n_outputs
            )));
        }
        if n_hndl > MAX_HNDL {
            return Err(GraphError::BadPorts(format!(
                "too many handles: {n_hndl} > {MAX_HNDL}"
            )));
        }
        if n_hndl == 0 {
            n_hndl = 1;
            if !allow_unused {
                tracing::warn!(
                    n_inputs = self.n_inputs,
                    n_input,
                    n_outputs = self.n_outputs,
                    n_output,
                    "channel counts do not divide; some filter ports will be unconnected"
                );
            }
            if self.n_outputs == 0 {
                self.n_outputs = n_output;
            }
        }
        tracing::info!(n_hndl, n_input, n_output, "using {} instances", n_hndl);
        self.n_hndl = n_hndl;

        for handle in 0..n_hndl {
            self.setup_inputs(handle, first)?;
            self.setup_outputs(handle, last)?;
        }

        // order all nodes on their dependencies (Kahn)
        let mut sort_deps: Vec<usize> = self.nodes.iter().map(|n| n.n_deps).collect();
        let mut sorted = vec![false; self.nodes.len()];
        self.order.clear();
        loop {
            let Some(next) = (0..self.nodes.len()).find(|&i| !sorted[i] && sort_deps[i] == 0)
            else {
                break;
            };
            sorted[next] = true;
            self.order.push(next);
            for link in &self.links {
                if link.output.node == next {
                    sort_deps[link.input.node] -= 1;
                }
            }
        }
        if self.order.len() != self.nodes.len() {
            return Err(GraphError::Cycle);
        }

        self.setup_done = true;
        Ok(())
    }

    fn setup_inputs(&mut self, handle: usize, first: usize) -> Result<(), GraphError> {
        if self.input_names.is_empty() {
            for pos in 0..self.nodes[first].audio_in.len() {
                tracing::debug!(handle, pos, "input port {}", self.nodes[first].name);
                self.ext_in.push(ExtIn {
                    handle,
                    targets: vec![(first, pos)],
                });
            }
            return Ok(());
        }

        for name_idx in 0..self.input_names.len() {
            let name = self.input_names[name_idx].clone();
            if name == "null" {
                tracing::debug!(slot = self.ext_in.len(), "ignored input port");
                self.ext_in.push(ExtIn {
                    handle,
                    targets: Vec::new(),
                });
                continue;
            }
            let port = self
                .find_port(first, &name, PortDir::Input, PortKind::Audio)
                .ok_or_else(|| GraphError::BadLink(format!("input port '{name}' not found")))?;
            let slot = self.ext_in.len();
            let node = &self.nodes[port.node];
            if handle == 0 {
                if let Some(prev) = node.in_external[port.pos] {
                    return Err(GraphError::Busy(format!(
                        "input port '{name}' already used as input {prev}, use mixer"
                    )));
                }
                if node.in_links[port.pos].is_some() {
                    return Err(GraphError::Busy(format!(
                        "input port '{name}' already used by link, use mixer"
                    )));
                }
            }

            let mut targets = Vec::new();
            let mut disabled = false;
            if node.desc.flags().contains(DescriptorFlags::COPY) {
                // fan the slot out to every port this head node feeds
                let node_idx = port.node;
                for link in &self.links {
                    if link.output.node == node_idx
                        && link.output.kind == PortKind::Audio
                        && link.input.kind == PortKind::Audio
                    {
                        tracing::debug!(
                            handle,
                            "copy input '{name}' -> {}:{}",
                            self.nodes[link.input.node].name,
                            link.input.pos
                        );
                        targets.push((link.input.node, link.input.pos));
                        disabled = true;
                    }
                }
                if disabled {
                    // the fan-out shadows the links at run time; the links
                    // themselves stay so a later re-setup can undo this
                    for (n, p) in &targets {
                        self.nodes[*n].in_external[*p] = Some(slot);
                    }
                    self.nodes[node_idx].disabled = true;
                }
            }
            if !disabled {
                tracing::debug!(handle, "input port '{name}'");
                targets.push((port.node, port.pos));
                self.nodes[port.node].in_external[port.pos] = Some(slot);
            }
            self.ext_in.push(ExtIn { handle, targets });
        }
        Ok(())
    }

    fn setup_outputs(&mut self, handle: usize, last: usize) -> Result<(), GraphError> {
        if self.output_names.is_empty() {
            for pos in 0..self.nodes[last].audio_out.len() {
                tracing::debug!(handle, pos, "output port {}", self.nodes[last].name);
                self.ext_out.push(ExtOut {
                    handle,
                    source: Some((last, pos)),
                });
            }
            return Ok(());
        }

        for name_idx in 0..self.output_names.len() {
            let name = self.output_names[name_idx].clone();
            if name == "null" {
                tracing::debug!(slot = self.ext_out.len(), "silence output port");
                self.ext_out.push(ExtOut {
                    handle,
                    source: None,
                });
                continue;
            }
            let port = self
                .find_port(last, &name, PortDir::Output, PortKind::Audio)
                .ok_or_else(|| GraphError::BadLink(format!("output port '{name}' not found")))?;
            let slot = self.ext_out.len();
            let node = &self.nodes[port.node];
            if handle == 0 {
                if let Some(prev) = node.out_external[port.pos] {
                    return Err(GraphError::Busy(format!(
                        "output port '{name}' already used as output {prev}, use copy"
                    )));
                }
                if node.out_links[port.pos] > 0 {
                    return Err(GraphError::Busy(format!(
                        "output port '{name}' already used by link, use copy"
                    )));
                }
            }
            tracing::debug!(handle, "output port '{name}'");
            self.nodes[port.node].out_external[port.pos] = Some(slot);
            self.ext_out.push(ExtOut {
                handle,
                source: Some((port.node, port.pos)),
            });
        }
        Ok(())
    }

    fn unsetup(&mut self) {
        self.ext_in.clear();
        self.ext_out.clear();
        self.order.clear();
        for node in &mut self.nodes {
            node.in_external.fill(None);
            node.out_external.fill(None);
            node.disabled = false;
        }
        self.setup_done = false;
    }

    /// Activate the graph for the given stream geometry.
    ///
    /// Idempotent while the geometry is unchanged; a changed channel count
    /// triggers a fresh setup. On failure the graph is left deactivated.
    pub fn activate(
        &mut self,
        rate: u32,
        n_inputs: usize,
        n_outputs: usize,
        quantum_limit: usize,
    ) -> Result<(), GraphError> {
        if self.activated {
            return Ok(());
        }
        if n_inputs != 0 && n_inputs != self.n_inputs {
            self.n_inputs = n_inputs;
            self.n_outputs = n_outputs;
            self.setup_done = false;
        } else if n_outputs != 0 && n_outputs != self.n_outputs {
            self.n_outputs = n_outputs;
            self.setup_done = false;
        }
        if !self.setup_done {
            self.setup()?;
        }

        self.rate = rate;
        self.quantum_limit = quantum_limit;
        self.silence = AlignedBuf::new(quantum_limit);

        match self.activate_instances() {
            Ok(()) => {
                self.compute_latency();
                self.activated = true;
                Ok(())
            }
            Err(e) => {
                self.deactivate();
                Err(e)
            }
        }
    }

    fn activate_instances(&mut self) -> Result<(), GraphError> {
        let n_hndl = self.n_hndl;

        // make instances
        for node in &mut self.nodes {
            node.instances.clear();
            node.controls = vec![node.control_init.clone(); n_hndl];
            node.notifies = vec![vec![0.0; node.notify.len()]; n_hndl];
            if node.disabled {
                continue;
            }
            for index in 0..n_hndl {
                tracing::info!(
                    node = %node.name,
                    desc = node.desc.name(),
                    index,
                    rate = self.rate,
                    "instantiate"
                );
                let ctx = InstantiateCtx {
                    sample_rate: self.rate,
                    index,
                    config: node.config.clone(),
                    dsp: self.dsp,
                    quantum_limit: self.quantum_limit,
                };
                node.instances.push(node.desc.instantiate(&ctx)?);
            }
        }

        // allocate arena buffers for every output that needs one
        self.arena.clear();
        self.arena_idx = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut per_port = Vec::with_capacity(node.audio_out.len());
            for (pos, &global) in node.audio_out.iter().enumerate() {
                let mut per_handle = Vec::with_capacity(n_hndl);
                for _ in 0..n_hndl {
                    let needs_buffer = node.out_links[pos] > 0
                        || node.out_external[pos].is_some()
                        || !node.allows_null(global);
                    if needs_buffer && !node.disabled {
                        per_handle.push(self.arena.len());
                        self.arena.push(Some(AlignedBuf::new(self.quantum_limit)));
                    } else {
                        per_handle.push(usize::MAX);
                    }
                }
                per_port.push(per_handle);
            }
            self.arena_idx.push(per_port);
        }

        self.compile_steps();

        // activate and propagate changed initial controls
        for node in &mut self.nodes {
            for (h, inst) in node.instances.iter_mut().enumerate() {
                inst.activate();
                if node.control_changed {
                    inst.control_changed(&node.controls[h]);
                }
            }
            // publish initial latency through the hinted notify port
            if let Some(pos) = node.latency_index {
                for (h, inst) in node.instances.iter().enumerate() {
                    if let Some(l) = inst.latency_samples() {
                        node.notifies[h][pos] = l;
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_steps(&mut self) {
        self.steps.clear();
        for &node_idx in &self.order {
            let node = &self.nodes[node_idx];
            if node.disabled {
                continue;
            }
            for handle in 0..self.n_hndl {
                let mut in_binds = Vec::with_capacity(node.audio_in.len());
                for (pos, &global) in node.audio_in.iter().enumerate() {
                    // an external slot shadows a link (COPY fan-out routes
                    // the caller buffer straight to the peers)
                    let bind = if let Some(slot) = self.ext_slot_for_input(node_idx, pos, handle)
                    {
                        InBind::External(slot)
                    } else if let Some(l) = node.in_links[pos] {
                        let src = self.links[l].output;
                        InBind::Arena(self.arena_idx[src.node][src.pos][handle])
                    } else if node.allows_null(global) {
                        InBind::Null
                    } else {
                        InBind::Silence
                    };
                    in_binds.push(bind);
                }

                let mut out_binds = Vec::with_capacity(node.audio_out.len());
                for (pos, _) in node.audio_out.iter().enumerate() {
                    let arena = self.arena_idx[node_idx][pos][handle];
                    let bind = match self.ext_slot_for_output(node_idx, pos, handle) {
                        Some(slot) => OutBind::External {
                            slot,
                            fallback: arena,
                        },
                        None if arena != usize::MAX => OutBind::Arena(arena),
                        None => OutBind::Null,
                    };
                    out_binds.push(bind);
                }

                let mut ctrl_from = Vec::with_capacity(node.control_in.len());
                for pos in 0..node.control_in.len() {
                    ctrl_from.push(node.ctrl_links[pos].map(|l| {
                        let src = self.links[l].output;
                        (src.node, src.pos)
                    }));
                }

                self.steps.push(Step {
                    node: node_idx,
                    handle,
                    in_binds,
                    out_binds,
                    ctrl_from,
                });
            }
        }
    }

    fn ext_slot_for_input(&self, node: usize, pos: usize, handle: usize) -> Option<usize> {
        self.ext_in.iter().position(|e| {
            e.handle == handle && e.targets.iter().any(|&(n, p)| n == node && p == pos)
        })
    }

    fn ext_slot_for_output(&self, node: usize, pos: usize, handle: usize) -> Option<usize> {
        self.ext_out
            .iter()
            .position(|e| e.handle == handle && e.source == Some((node, pos)))
    }

    fn compute_latency(&mut self) {
        for &node_idx in &self.order.clone() {
            let mut min_latency = f32::MAX;
            let mut max_latency = 0.0f32;
            for pos in 0..self.nodes[node_idx].audio_in.len() {
                if let Some(l) = self.nodes[node_idx].in_links[pos] {
                    let src = self.links[l].output.node;
                    min_latency = min_latency.min(self.nodes[src].min_latency);
                    max_latency = max_latency.max(self.nodes[src].max_latency);
                }
            }
            if min_latency == f32::MAX {
                min_latency = 0.0;
            }
            let node = &mut self.nodes[node_idx];
            if let Some(pos) = node.latency_index {
                let own = node.notifies.first().map_or(0.0, |n| n[pos]);
                min_latency += own;
                max_latency += own;
            }
            node.min_latency = min_latency;
            node.max_latency = max_latency;
            tracing::debug!(node = %node.name, min_latency, max_latency, "node latency");
        }

        let mut min_latency = f32::MAX;
        let mut max_latency = 0.0f32;
        for ext in &self.ext_out {
            let Some((node, _)) = ext.source else { continue };
            min_latency = min_latency.min(self.nodes[node].min_latency);
            max_latency = max_latency.max(self.nodes[node].max_latency);
        }
        if min_latency == f32::MAX {
            min_latency = 0.0;
        }
        if min_latency != max_latency {
            tracing::warn!(
                min_latency,
                max_latency,
                "graph has unaligned latency, consider adding delays to align the signals"
            );
        }
        self.min_latency = min_latency;
        self.max_latency = max_latency;
        tracing::info!(min_latency, max_latency, "graph latency");
    }

    /// Deactivate all instances and release the run-time state.
    pub fn deactivate(&mut self) {
        for node in &mut self.nodes {
            for inst in &mut node.instances {
                inst.deactivate();
            }
            node.instances.clear();
        }
        self.steps.clear();
        self.arena.clear();
        self.arena_idx.clear();
        self.activated = false;
    }

    /// Re-initialize all filter state without relinking.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            for inst in &mut node.instances {
                inst.deactivate();
                inst.activate();
            }
        }
    }

    /// Service main-thread work requested by instances from the run path.
    pub fn process_work(&mut self) {
        let nodes = &mut self.nodes;
        self.work.process(|item: WorkItem| {
            if let Some(inst) = nodes
                .get_mut(item.node)
                .and_then(|n| n.instances.get_mut(item.handle))
            {
                inst.work();
            }
        });
    }

    /// Process one quantum on the real-time thread.
    ///
    /// `inputs` and `outputs` are the external channel slots in slot
    /// order; a missing input reads silence, a missing output falls back
    /// to an internal buffer. Slots without a bound source are zeroed.
    pub fn run(
        &mut self,
        inputs: &[Option<&[f32]>],
        outputs: &mut [Option<&mut [f32]>],
        n_samples: usize,
    ) {
        if !self.activated {
            for out in outputs.iter_mut() {
                if let Some(buf) = out.as_deref_mut() {
                    let len = n_samples.min(buf.len());
                    buf[..len].fill(0.0);
                }
            }
            return;
        }
        let n = n_samples.min(self.quantum_limit);

        // completions only signal that retired resources were freed
        while self.work.poll_done().is_some() {}

        // zero output slots that have no bound source
        for (slot, ext) in self.ext_out.iter().enumerate() {
            if ext.source.is_none() {
                if let Some(Some(buf)) = outputs.get_mut(slot) {
                    buf[..n].fill(0.0);
                }
            }
        }

        for step_idx in 0..self.steps.len() {
            let step = &self.steps[step_idx];
            let node_idx = step.node;
            let handle = step.handle;

            // forward linked control values written by upstream notifies
            for (pos, from) in step.ctrl_from.iter().enumerate() {
                if let Some((src, npos)) = *from {
                    let v = self.nodes[src].notifies[handle][npos];
                    self.nodes[node_idx].controls[handle][pos] = v;
                }
            }

            // pull this step's output buffers out of the arena
            let mut taken: [Option<AlignedBuf>; MAX_PORTS] = std::array::from_fn(|_| None);
            for (pos, bind) in step.out_binds.iter().enumerate() {
                match *bind {
                    OutBind::Arena(idx) => taken[pos] = self.arena[idx].take(),
                    OutBind::External { slot, fallback } => {
                        let caller_has = matches!(outputs.get(slot), Some(Some(_)));
                        if !caller_has && fallback != usize::MAX {
                            taken[pos] = self.arena[fallback].take();
                        }
                    }
                    OutBind::Null => {}
                }
            }

            let mut in_views: [Option<&[f32]>; MAX_PORTS] = [None; MAX_PORTS];
            for (pos, bind) in step.in_binds.iter().enumerate() {
                in_views[pos] = match *bind {
                    InBind::External(slot) => match inputs.get(slot) {
                        Some(Some(buf)) => Some(&buf[..n]),
                        _ => Some(&self.silence.as_slice()[..n]),
                    },
                    InBind::Arena(idx) => match self.arena[idx].as_ref() {
                        Some(buf) => Some(&buf.as_slice()[..n]),
                        None => Some(&self.silence.as_slice()[..n]),
                    },
                    InBind::Silence => Some(&self.silence.as_slice()[..n]),
                    InBind::Null => None,
                };
            }

            let mut out_views: [Option<&mut [f32]>; MAX_PORTS] = std::array::from_fn(|_| None);
            // caller buffers for external slots
            for (slot, out) in outputs.iter_mut().enumerate() {
                let Some(pos) = step.out_binds.iter().position(
                    |b| matches!(b, OutBind::External { slot: s, .. } if *s == slot),
                ) else {
                    continue;
                };
                if let Some(view) = out.as_deref_mut().map(|b| &mut b[..n]) {
                    out_views[pos] = Some(view);
                }
            }
            // arena-backed slots
            for (pos, t) in taken.iter_mut().enumerate() {
                if let Some(buf) = t.as_mut() {
                    out_views[pos] = Some(&mut buf.as_mut_slice()[..n]);
                }
            }

            let n_in = step.in_binds.len();
            let n_out = step.out_binds.len();
            let node = &mut self.nodes[node_idx];
            let inst = &mut node.instances[handle];
            {
                let mut ports = Ports {
                    audio_in: &in_views[..n_in],
                    audio_out: &mut out_views[..n_out],
                    control: &node.controls[handle],
                    notify: &mut node.notifies[handle],
                };
                inst.run(&mut ports, n);
            }
            if inst.wants_work() {
                self.work.schedule(WorkItem {
                    node: node_idx,
                    handle,
                });
            }

            // return the buffers to the arena
            for (pos, bind) in step.out_binds.iter().enumerate() {
                if let Some(buf) = taken[pos].take() {
                    let idx = match *bind {
                        OutBind::Arena(idx) => idx,
                        OutBind::External { fallback, .. } => fallback,
                        OutBind::Null => continue,
                    };
                    self.arena[idx] = Some(buf);
                }
            }
        }
    }

    /// Set one control by name; `None` restores the port default. Returns
    /// the number of changed slots.
    pub fn set_control(&mut self, name: &str, value: Option<f32>) -> Result<usize, GraphError> {
        let port = self
            .find_port(0, name, PortDir::Input, PortKind::Control)
            .ok_or_else(|| GraphError::BadLink(format!("unknown control port '{name}'")))?;

        let node = &mut self.nodes[port.node];
        let global = node.control_in[port.pos];
        let value = value.unwrap_or(node.desc.ports()[global].def);

        let mut changed = 0;
        node.control_init[port.pos] = value;
        for h in 0..node.controls.len() {
            let old = node.controls[h][port.pos];
            if old != value {
                tracing::debug!(
                    control = name,
                    handle = h,
                    old,
                    new = value,
                    "control update"
                );
                node.controls[h][port.pos] = value;
                changed += 1;
            }
        }
        if changed > 0 {
            node.control_changed = true;
        }
        Ok(changed)
    }

    /// Apply a flat parameter list, then notify every affected node.
    ///
    /// Unknown names are skipped. Returns the number of changed slots.
    pub fn set_params(&mut self, params: &[(&str, f32)]) -> usize {
        let mut changed = 0;
        for (name, value) in params {
            match self.set_control(name, Some(*value)) {
                Ok(n) => changed += n,
                Err(_) => tracing::debug!(name, "skipping unknown param"),
            }
        }
        self.apply_control_changes();
        changed
    }

    fn apply_control_changes(&mut self) {
        for node in &mut self.nodes {
            if !node.control_changed {
                continue;
            }
            for (h, inst) in node.instances.iter_mut().enumerate() {
                inst.control_changed(&node.controls[h]);
            }
            node.control_changed = false;
        }
    }

    /// Apply mute and per-channel volumes to the nominated control ports.
    pub fn set_volume(&mut self, dir: Direction, mute: bool, volumes: &[f32]) {
        {
            let group = &mut self.volumes[dir as usize];
            group.mute = mute;
            group.volumes = volumes.to_vec();
        }
        self.sync_volume(dir);
        self.apply_control_changes();
    }

    fn sync_volume(&mut self, dir: Direction) {
        let group = &self.volumes[dir as usize];
        if group.ports.is_empty() {
            return;
        }
        let updates: Vec<(usize, usize, usize, f32)> = group
            .volumes
            .iter()
            .enumerate()
            .map(|(i, &vol)| {
                let n_port = i % group.ports.len();
                let (node, pos) = group.ports[n_port];
                let mut v = if group.mute { 0.0 } else { vol };
                if group.scale[n_port] == VolumeScale::Cubic {
                    v = v.cbrt();
                }
                v = v * (group.max[n_port] - group.min[n_port]) + group.min[n_port];
                (node, pos, i, v)
            })
            .collect();

        for (node_idx, pos, i, v) in updates {
            let node = &mut self.nodes[node_idx];
            let n_hndl = node.controls.len().max(1);
            let h = i % n_hndl;
            match node.controls.get_mut(h).and_then(|c| c.get_mut(pos)) {
                Some(slot) => {
                    if *slot != v {
                        *slot = v;
                        node.control_changed = true;
                    }
                }
                // not activated yet: record in the initial values
                None => node.control_init[pos] = v,
            }
        }
    }

    /// Enumerate control-port metadata, rate-scaled where hinted.
    #[must_use]
    pub fn enum_props(&self) -> Vec<PropInfo> {
        let mut props = Vec::new();
        for node in &self.nodes {
            for &global in &node.control_in {
                let port = &node.desc.ports()[global];
                let scale = if port.hints.contains(PortHints::SAMPLE_RATE) {
                    self.rate.max(1) as f32
                } else {
                    1.0
                };
                props.push(PropInfo {
                    name: format!("{}:{}", node.name, port.name),
                    def: port.def * scale,
                    min: port.min * scale,
                    max: port.max * scale,
                    is_boolean: port.hints.contains(PortHints::BOOLEAN),
                    is_integer: port.hints.contains(PortHints::INTEGER),
                });
            }
        }
        props
    }

    /// Current control values (handle 0), qualified by node name.
    #[must_use]
    pub fn get_props(&self) -> Vec<(String, f32)> {
        let mut out = Vec::new();
        for node in &self.nodes {
            for (pos, &global) in node.control_in.iter().enumerate() {
                let port = &node.desc.ports()[global];
                let value = node
                    .controls
                    .first()
                    .map_or(node.control_init[pos], |c| c[pos]);
                out.push((format!("{}:{}", node.name, port.name), value));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn registry() -> PluginRegistry {
        PluginRegistry::new()
    }

    fn single_node(label: &str) -> GraphConfig {
        GraphConfig {
            nodes: vec![NodeConfig::builtin(label, label)],
            ..GraphConfig::default()
        }
    }

    #[test]
    fn load_rejects_empty_graph() {
        assert!(matches!(
            FilterGraph::load(&GraphConfig::default(), &registry()),
            Err(GraphError::BadConfig(_))
        ));
    }

    #[test]
    fn copy_graph_runs_identity() {
        let mut graph = FilterGraph::load(&single_node("copy"), &registry()).unwrap();
        graph.activate(48_000, 1, 1, 1024).unwrap();

        let input = [0.0f32, 1.0, 2.0, 3.0];
        let mut out = [9.0f32; 4];
        {
            let ins = [Some(&input[..])];
            let mut out_slot: Option<&mut [f32]> = Some(&mut out);
            let outs = std::slice::from_mut(&mut out_slot);
            graph.run(&ins, outs, 4);
        }
        assert_eq!(out, input);
    }

    #[test]
    fn cycle_is_rejected() {
        let config = GraphConfig {
            nodes: vec![
                NodeConfig::builtin("copy", "a"),
                NodeConfig::builtin("copy", "b"),
            ],
            links: vec![
                crate::config::LinkConfig {
                    output: "a:Out".into(),
                    input: "b:In".into(),
                },
                crate::config::LinkConfig {
                    output: "b:Out".into(),
                    input: "a:In".into(),
                },
            ],
            inputs: vec![],
            outputs: vec![],
            ..GraphConfig::default()
        };
        let mut graph = FilterGraph::load(&config, &registry()).unwrap();
        assert!(matches!(
            graph.activate(48_000, 1, 1, 1024),
            Err(GraphError::Cycle)
        ));
    }

    #[test]
    fn double_link_is_busy() {
        let config = GraphConfig {
            nodes: vec![
                NodeConfig::builtin("copy", "a"),
                NodeConfig::builtin("copy", "b"),
                NodeConfig::builtin("copy", "c"),
            ],
            links: vec![
                crate::config::LinkConfig {
                    output: "a:Out".into(),
                    input: "c:In".into(),
                },
                crate::config::LinkConfig {
                    output: "b:Out".into(),
                    input: "c:In".into(),
                },
            ],
            ..GraphConfig::default()
        };
        assert!(matches!(
            FilterGraph::load(&config, &registry()),
            Err(GraphError::Busy(_))
        ));
    }
}
