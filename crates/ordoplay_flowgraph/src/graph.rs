// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flow graph: blocks, connections, contexts and lifecycle.

use crate::block::{ports, Block, BlockId, BlockKind};
use crate::connection::{Connection, ConnectionId, LinkKind};
use crate::context::{ContextId, EventBlockState, ExecutionContext};
use crate::coordinator::CoordinatorShared;
use crate::custom_event::{CustomEvent, CustomEventError};
use crate::dispatch::DispatchReport;
use crate::execution::{ExecutionEnv, ExecutionError, Executor};
use crate::port::{PortDirection, PortId, PortType, PortValue};
use crate::scene::{MeshId, PickInfo};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;
use uuid::Uuid;

/// Unique identifier for a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Create a new random graph ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

/// Graph lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphState {
    /// Editable, event blocks idle
    #[default]
    Stopped,
    /// Event blocks armed
    Started,
    /// Released; terminal
    Disposed,
}

/// Serializable structure of a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDescriptor {
    /// Graph name
    pub name: String,
    /// Blocks, in insertion order
    pub blocks: Vec<Block>,
    /// Connections, in connection order
    pub connections: Vec<Connection>,
}

impl GraphDescriptor {
    /// Serialize to a pretty RON string
    pub fn to_ron(&self) -> Result<String, GraphError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Parse from a RON string
    pub fn from_ron(content: &str) -> Result<Self, GraphError> {
        Ok(ron::from_str(content)?)
    }
}

/// A flow graph bound to a coordinator
pub struct FlowGraph {
    id: GraphId,
    /// Graph name
    pub name: String,
    state: GraphState,
    blocks: IndexMap<BlockId, Block>,
    connections: IndexMap<ConnectionId, Connection>,
    event_blocks: Vec<BlockId>,
    contexts: IndexMap<ContextId, ExecutionContext>,
    ready_fired: HashSet<BlockId>,
    shared: Rc<CoordinatorShared>,
}

impl FlowGraph {
    pub(crate) fn new(name: impl Into<String>, shared: Rc<CoordinatorShared>) -> Self {
        Self {
            id: GraphId::new(),
            name: name.into(),
            state: GraphState::Stopped,
            blocks: IndexMap::new(),
            connections: IndexMap::new(),
            event_blocks: Vec::new(),
            contexts: IndexMap::new(),
            ready_fired: HashSet::new(),
            shared,
        }
    }

    /// Graph ID
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Whether event blocks are armed
    pub fn is_started(&self) -> bool {
        self.state == GraphState::Started
    }

    /// Whether the graph was disposed
    pub fn is_disposed(&self) -> bool {
        self.state == GraphState::Disposed
    }

    fn ensure_editable(&self) -> Result<(), GraphError> {
        match self.state {
            GraphState::Stopped => Ok(()),
            GraphState::Disposed => Err(GraphError::Disposed),
            state => Err(GraphError::NotEditable(state)),
        }
    }

    // Blocks

    /// Add a block. Event blocks become entry points.
    pub fn add_block(&mut self, block: Block) -> Result<BlockId, GraphError> {
        self.ensure_editable()?;
        if self.blocks.contains_key(&block.id) {
            return Err(GraphError::DuplicateBlock(block.id));
        }

        if let Some((event_id, schema)) = block.kind.custom_event() {
            for (field, _) in schema.fields() {
                if matches!(field, ports::IN | ports::OUT | ports::DONE) {
                    return Err(GraphError::InvalidBlock {
                        block: block.id,
                        reason: format!("custom event field '{field}' shadows a signal port"),
                    });
                }
            }
            self.shared.bus.schemas.borrow_mut().register(event_id, schema)?;
        }

        let id = block.id;
        if block.is_event() {
            self.event_blocks.push(id);
        }
        tracing::trace!(graph = ?self.id, block = ?id, name = %block.name, "Added block");
        self.blocks.insert(id, block);
        Ok(id)
    }

    /// Add a block that must be an event block
    pub fn add_event_block(&mut self, block: Block) -> Result<BlockId, GraphError> {
        if !block.is_event() {
            return Err(GraphError::NotAnEventBlock(block.id));
        }
        self.add_block(block)
    }

    /// Remove a block and its connections
    pub fn remove_block(&mut self, block_id: BlockId) -> Result<Block, GraphError> {
        self.ensure_editable()?;
        let block = self
            .blocks
            .shift_remove(&block_id)
            .ok_or(GraphError::BlockNotFound(block_id))?;

        self.connections.retain(|_, c| !c.involves_block(block_id));
        self.event_blocks.retain(|id| *id != block_id);
        if let Some((event_id, schema)) = block.kind.custom_event() {
            self.shared.bus.schemas.borrow_mut().unregister(event_id, schema);
        }
        Ok(block)
    }

    /// Get a block by ID
    pub fn block(&self, block_id: BlockId) -> Option<&Block> {
        self.blocks.get(&block_id)
    }

    /// Get all blocks
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Entry points, in registration order
    pub fn event_blocks(&self) -> impl Iterator<Item = &Block> {
        self.event_blocks.iter().filter_map(|id| self.blocks.get(id))
    }

    /// Get the number of blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    // Connections

    /// Connect output `from_port` of `from_block` to input `to_port` of `to_block`
    pub fn connect(
        &mut self,
        from_block: BlockId,
        from_port: &str,
        to_block: BlockId,
        to_port: &str,
    ) -> Result<ConnectionId, GraphError> {
        let from = self.port_id(from_block, from_port, PortDirection::Output)?;
        let to = self.port_id(to_block, to_port, PortDirection::Input)?;
        self.connect_ports(from_block, from, to_block, to)
    }

    fn port_id(
        &self,
        block_id: BlockId,
        name: &str,
        direction: PortDirection,
    ) -> Result<PortId, ConnectionError> {
        let block = self
            .blocks
            .get(&block_id)
            .ok_or(ConnectionError::BlockNotFound(block_id))?;
        block
            .port_named(name, direction)
            .map(|p| p.id)
            .ok_or_else(|| ConnectionError::PortNameNotFound {
                block: block_id,
                port: name.to_string(),
            })
    }

    /// Add a connection between ports
    pub fn connect_ports(
        &mut self,
        from_block: BlockId,
        from_port: PortId,
        to_block: BlockId,
        to_port: PortId,
    ) -> Result<ConnectionId, GraphError> {
        self.ensure_editable()?;

        let source_block = self
            .blocks
            .get(&from_block)
            .ok_or(ConnectionError::BlockNotFound(from_block))?;
        let target_block = self
            .blocks
            .get(&to_block)
            .ok_or(ConnectionError::BlockNotFound(to_block))?;

        let source_port = source_block
            .port(&from_port)
            .ok_or(ConnectionError::PortNotFound(from_port))?;
        let target_port = target_block
            .port(&to_port)
            .ok_or(ConnectionError::PortNotFound(to_port))?;

        if source_port.direction != PortDirection::Output
            || target_port.direction != PortDirection::Input
        {
            return Err(ConnectionError::DirectionMismatch.into());
        }

        if !source_port.can_connect(target_port) {
            return Err(ConnectionError::IncompatiblePorts {
                from: source_port.port_type.clone(),
                to: target_port.port_type.clone(),
            }
            .into());
        }

        if !target_port.multi_connect && self.connections_to(to_port).next().is_some() {
            return Err(ConnectionError::PortAlreadyConnected(to_port).into());
        }

        if from_block == to_block {
            return Err(ConnectionError::SelfLoop.into());
        }

        let kind = if source_port.is_signal() {
            LinkKind::Signal
        } else {
            LinkKind::Data
        };

        // Data is pulled recursively, so data edges must stay acyclic
        if kind == LinkKind::Data && self.data_path_exists(to_block, from_block) {
            return Err(ConnectionError::Cycle.into());
        }

        let connection = Connection::new(kind, from_block, from_port, to_block, to_port);
        let id = connection.id;
        self.connections.insert(id, connection);
        Ok(id)
    }

    fn data_path_exists(&self, start: BlockId, goal: BlockId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![start];

        while let Some(block) = stack.pop() {
            if block == goal {
                return true;
            }
            if !visited.insert(block) {
                continue;
            }
            stack.extend(
                self.connections
                    .values()
                    .filter(|c| c.kind == LinkKind::Data && c.from_block == block)
                    .map(|c| c.to_block),
            );
        }
        false
    }

    /// Remove a connection
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Result<Connection, GraphError> {
        self.ensure_editable()?;
        self.connections
            .shift_remove(&connection_id)
            .ok_or(GraphError::ConnectionNotFound(connection_id))
    }

    /// Get a connection by ID
    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    /// Get all connections
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Get connections from a specific port, in connection order
    pub fn connections_from(&self, port_id: PortId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.from_port == port_id)
    }

    /// Get connections to a specific port
    pub fn connections_to(&self, port_id: PortId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.to_port == port_id)
    }

    /// Whether any connection touches the port
    pub fn is_port_connected(&self, port_id: PortId) -> bool {
        self.connections.values().any(|c| c.involves_port(port_id))
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Check that every data input can produce a value.
    ///
    /// An unconnected input is resolved by a default, or by an override
    /// present in every context. Required inputs must be connected.
    pub fn validate(&self) -> Result<(), GraphError> {
        for block in self.blocks.values() {
            for port in block.data_inputs() {
                if self.connections_to(port.id).next().is_some() {
                    continue;
                }
                let overridden = !self.contexts.is_empty()
                    && self.contexts.values().all(|ctx| ctx.has_override(port.id));
                if port.required || (port.effective_default().is_none() && !overridden) {
                    return Err(GraphError::UnresolvedInput {
                        block: block.id,
                        port: port.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    // Lifecycle

    /// Validate and arm every event block.
    ///
    /// If the scene is already ready, scene-ready blocks fire before this
    /// returns; the report describes those firings.
    pub fn start(&mut self) -> Result<DispatchReport, GraphError> {
        match self.state {
            GraphState::Disposed => return Err(GraphError::Disposed),
            GraphState::Started => return Ok(DispatchReport::default()),
            GraphState::Stopped => {}
        }

        self.validate()?;
        if self.contexts.is_empty() && self.shared.config.create_default_context {
            self.insert_context();
        }

        self.state = GraphState::Started;
        for context in self.contexts.values_mut() {
            for block in &self.event_blocks {
                context.set_event_state(*block, EventBlockState::Armed);
            }
        }
        tracing::debug!(graph = ?self.id, name = %self.name, "Started flow graph");

        let mut report = DispatchReport::default();
        if self.shared.scene_ready.get() {
            self.fire_scene_ready(&mut report);
            self.deliver_queued_events(&mut report);
        }
        Ok(report)
    }

    /// Disarm event blocks; the graph becomes editable again
    pub fn stop(&mut self) {
        if self.state != GraphState::Started {
            return;
        }
        self.state = GraphState::Stopped;
        for context in self.contexts.values_mut() {
            context.disarm_all();
        }
        tracing::debug!(graph = ?self.id, name = %self.name, "Stopped flow graph");
    }

    /// Release every block and context. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if self.state == GraphState::Disposed {
            return;
        }
        self.state = GraphState::Disposed;
        self.release_declarations();

        self.contexts.clear();
        self.connections.clear();
        self.event_blocks.clear();
        self.blocks.clear();
        tracing::debug!(graph = ?self.id, name = %self.name, "Disposed flow graph");
    }

    fn release_declarations(&self) {
        let Ok(mut schemas) = self.shared.bus.schemas.try_borrow_mut() else {
            tracing::warn!(graph = ?self.id, "Schema registry busy, custom event declarations kept");
            return;
        };
        for block in self.blocks.values() {
            if let Some((event_id, schema)) = block.kind.custom_event() {
                schemas.unregister(event_id, schema);
            }
        }
    }

    // Contexts

    fn insert_context(&mut self) -> ContextId {
        let mut context = ExecutionContext::new(self.id);
        if self.state == GraphState::Started {
            for block in &self.event_blocks {
                context.set_event_state(*block, EventBlockState::Armed);
            }
        }
        let id = context.id();
        self.contexts.insert(id, context);
        id
    }

    /// Create a new independent context.
    ///
    /// On a started graph of a ready scene, scene-ready blocks that never
    /// found a context fire in it before this returns.
    pub fn create_context(&mut self) -> Result<ContextId, GraphError> {
        if self.is_disposed() {
            return Err(GraphError::Disposed);
        }
        let id = self.insert_context();
        if self.is_started() && self.shared.scene_ready.get() {
            let mut report = DispatchReport::default();
            self.fire_scene_ready(&mut report);
            self.deliver_queued_events(&mut report);
        }
        Ok(id)
    }

    /// Get a context by ID
    pub fn context(&self, context_id: ContextId) -> Option<&ExecutionContext> {
        self.contexts.get(&context_id)
    }

    /// Get a mutable context by ID
    pub fn context_mut(&mut self, context_id: ContextId) -> Option<&mut ExecutionContext> {
        self.contexts.get_mut(&context_id)
    }

    /// Get all contexts
    pub fn contexts(&self) -> impl Iterator<Item = &ExecutionContext> {
        self.contexts.values()
    }

    /// The first context, usually the only one
    pub fn default_context(&self) -> Option<&ExecutionContext> {
        self.contexts.values().next()
    }

    /// Set a literal value on a data input, scoped to one context
    pub fn set_value(
        &mut self,
        context_id: ContextId,
        block_id: BlockId,
        port: &str,
        value: PortValue,
    ) -> Result<(), GraphError> {
        if self.is_disposed() {
            return Err(GraphError::Disposed);
        }
        let block = self
            .blocks
            .get(&block_id)
            .ok_or(GraphError::BlockNotFound(block_id))?;
        let input = block
            .input(port)
            .filter(|p| !p.is_signal())
            .ok_or_else(|| ConnectionError::PortNameNotFound {
                block: block_id,
                port: port.to_string(),
            })?;

        if !value.port_type().can_connect_to(&input.port_type) {
            return Err(GraphError::TypeMismatch {
                port: port.to_string(),
                expected: input.port_type.clone(),
                found: value.port_type(),
            });
        }

        let context = self
            .contexts
            .get_mut(&context_id)
            .ok_or(GraphError::ContextNotFound(context_id))?;
        context.set_override(input.id, value);
        Ok(())
    }

    /// Resolve a data input through a context, as a block would at fire time
    pub fn read_input(
        &mut self,
        context_id: ContextId,
        block_id: BlockId,
        port: &str,
    ) -> Result<PortValue, GraphError> {
        let env = ExecutionEnv {
            sink: self.shared.sink.as_ref(),
            outbox: &self.shared.bus.outbox,
            max_depth: self.shared.config.max_execution_depth,
        };
        let context = self
            .contexts
            .get_mut(&context_id)
            .ok_or(GraphError::ContextNotFound(context_id))?;
        let value =
            Executor::new(&self.blocks, &self.connections, &env, context).read_input(block_id, port)?;
        Ok(value)
    }

    // Serialization

    /// Export the graph structure
    pub fn to_descriptor(&self) -> GraphDescriptor {
        GraphDescriptor {
            name: self.name.clone(),
            blocks: self.blocks.values().cloned().collect(),
            connections: self.connections.values().cloned().collect(),
        }
    }

    /// Export the graph structure as RON
    pub fn to_ron(&self) -> Result<String, GraphError> {
        self.to_descriptor().to_ron()
    }

    /// Add every block and connection of a descriptor, validating each
    pub fn load_descriptor(&mut self, descriptor: GraphDescriptor) -> Result<(), GraphError> {
        self.ensure_editable()?;
        self.name = descriptor.name;
        for block in descriptor.blocks {
            self.add_block(block)?;
        }
        for c in descriptor.connections {
            self.connect_ports(c.from_block, c.from_port, c.to_block, c.to_port)?;
        }
        Ok(())
    }

    // Dispatch, driven by the coordinator

    pub(crate) fn fire_scene_ready(&mut self, report: &mut DispatchReport) {
        if !self.is_started() {
            return;
        }
        let pending: Vec<BlockId> = self
            .event_blocks
            .iter()
            .copied()
            .filter(|id| {
                !self.ready_fired.contains(id)
                    && matches!(
                        self.blocks.get(id).map(|b| &b.kind),
                        Some(BlockKind::SceneReadyEvent)
                    )
            })
            .collect();

        for block_id in pending {
            if self.fire_event(block_id, &[], false, report) > 0 {
                self.ready_fired.insert(block_id);
            }
        }
    }

    /// Deliver custom events queued while this graph was held by its owner
    fn deliver_queued_events(&mut self, report: &mut DispatchReport) {
        if self.shared.bus.outbox.borrow().is_empty() {
            return;
        }
        let bus = Rc::clone(&self.shared.bus);
        bus.deliver(Some(self), report);
    }

    /// Fire pick blocks bound to `mesh`. Returns whether bubbling should stop.
    pub(crate) fn dispatch_pick(
        &mut self,
        notification: u64,
        mesh: MeshId,
        pick: &PickInfo,
        report: &mut DispatchReport,
    ) -> bool {
        if !self.is_started() {
            return false;
        }
        for context in self.contexts.values_mut() {
            context.begin_pick(notification);
        }

        let targets: Vec<(BlockId, bool)> = self
            .event_blocks
            .iter()
            .filter_map(|id| match self.blocks.get(id).map(|b| &b.kind) {
                Some(BlockKind::MeshPickEvent {
                    target,
                    stop_propagation,
                }) if *target == mesh => Some((*id, *stop_propagation)),
                _ => None,
            })
            .collect();

        let mut stop = false;
        for (block_id, stop_propagation) in targets {
            let values = self.pick_values(block_id, pick);
            self.fire_event(block_id, &values, true, report);
            stop |= stop_propagation;
        }
        stop
    }

    fn pick_values(&self, block_id: BlockId, pick: &PickInfo) -> Vec<(PortId, PortValue)> {
        let Some(block) = self.blocks.get(&block_id) else {
            return Vec::new();
        };
        let mut values = Vec::new();
        if let Some(port) = block.output(ports::PICKED_MESH) {
            values.push((port.id, PortValue::Mesh(pick.picked_mesh)));
        }
        if let Some(port) = block.output(ports::POINTER_ID) {
            values.push((port.id, PortValue::Int(pick.pointer_id)));
        }
        values
    }

    pub(crate) fn deliver_custom_event(&mut self, event: &CustomEvent, report: &mut DispatchReport) {
        if !self.is_started() {
            return;
        }
        let receivers: Vec<BlockId> = self
            .event_blocks
            .iter()
            .copied()
            .filter(|id| {
                matches!(
                    self.blocks.get(id).map(|b| &b.kind),
                    Some(BlockKind::ReceiveCustomEvent { event_id, .. }) if *event_id == event.event_id
                )
            })
            .collect();

        for block_id in receivers {
            match self.custom_event_values(block_id, event) {
                Ok(values) => {
                    self.fire_event(block_id, &values, false, report);
                }
                Err(error) => report.record_error(self.id, Some(block_id), error),
            }
        }
    }

    fn custom_event_values(
        &self,
        block_id: BlockId,
        event: &CustomEvent,
    ) -> Result<Vec<(PortId, PortValue)>, ExecutionError> {
        let block = self
            .blocks
            .get(&block_id)
            .ok_or(ExecutionError::BlockNotFound(block_id))?;
        let Some((_, schema)) = block.kind.custom_event() else {
            return Ok(Vec::new());
        };

        let mut values = Vec::with_capacity(schema.len());
        for (field, field_type) in schema.fields() {
            let value = event
                .payload
                .get(field)
                .ok_or_else(|| ExecutionError::MissingEventField {
                    event_id: event.event_id.clone(),
                    field: field.to_string(),
                })?;
            let value = value
                .coerce_to(field_type)
                .ok_or_else(|| ExecutionError::EventFieldType {
                    event_id: event.event_id.clone(),
                    field: field.to_string(),
                    expected: field_type.clone(),
                    found: value.port_type(),
                })?;
            let port = block
                .output(field)
                .ok_or_else(|| ExecutionError::PortNotFound {
                    block: block_id,
                    port: field.to_string(),
                })?;
            values.push((port.id, value));
        }
        Ok(values)
    }

    /// Fire an event block's `done` output in every context where it is armed.
    /// Returns the number of contexts it ran in.
    fn fire_event(
        &mut self,
        block_id: BlockId,
        values: &[(PortId, PortValue)],
        pick_scoped: bool,
        report: &mut DispatchReport,
    ) -> usize {
        let env = ExecutionEnv {
            sink: self.shared.sink.as_ref(),
            outbox: &self.shared.bus.outbox,
            max_depth: self.shared.config.max_execution_depth,
        };

        let mut activations = 0;
        let context_ids: Vec<ContextId> = self.contexts.keys().copied().collect();
        for context_id in context_ids {
            if self.state != GraphState::Started {
                break;
            }
            let Some(context) = self.contexts.get_mut(&context_id) else {
                continue;
            };
            if context.event_state(block_id) != EventBlockState::Armed {
                continue;
            }
            if pick_scoped && context.pick_handled_by(block_id) {
                continue;
            }

            activations += 1;
            context.begin_activation();
            context.set_event_state(block_id, EventBlockState::Firing);
            for (port, value) in values {
                context.set_event_value(*port, value.clone());
            }
            if pick_scoped {
                context.mark_pick_handled(block_id);
            }

            let result = Executor::new(&self.blocks, &self.connections, &env, context)
                .fire_signal(block_id, ports::DONE);
            context.set_event_state(block_id, EventBlockState::Armed);

            match result {
                Ok(()) => report.record_fired(self.id, block_id, context_id),
                Err(error) => report.record_error(self.id, Some(block_id), error),
            }
        }
        activations
    }
}

impl Drop for FlowGraph {
    fn drop(&mut self) {
        if !self.is_disposed() {
            self.release_declarations();
        }
    }
}

/// Error when creating a connection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// Block not found
    #[error("Block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// Port not found
    #[error("Port not found: {0:?}")]
    PortNotFound(PortId),

    /// Named port not found on a block
    #[error("Block {block:?} has no port '{port}'")]
    PortNameNotFound {
        /// Block that was queried
        block: BlockId,
        /// Requested port name
        port: String,
    },

    /// Connections must run from an output to an input
    #[error("Connections must run from an output to an input")]
    DirectionMismatch,

    /// Incompatible port types
    #[error("Incompatible port types: {from} -> {to}")]
    IncompatiblePorts {
        /// Source type
        from: PortType,
        /// Target type
        to: PortType,
    },

    /// Port is already connected
    #[error("Port already connected: {0:?}")]
    PortAlreadyConnected(PortId),

    /// Self-loop not allowed
    #[error("Self-loop not allowed")]
    SelfLoop,

    /// Data connection would create a cycle
    #[error("Data connection would create a cycle")]
    Cycle,
}

/// Error raised while building or driving a graph
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Graph was disposed
    #[error("Graph is disposed")]
    Disposed,

    /// Structure can only change while stopped
    #[error("Graph cannot be edited while {0:?}")]
    NotEditable(GraphState),

    /// Block not found
    #[error("Block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// Block ID already in use
    #[error("Duplicate block: {0:?}")]
    DuplicateBlock(BlockId),

    /// Block is not an event block
    #[error("Block {0:?} is not an event block")]
    NotAnEventBlock(BlockId),

    /// Block declaration is invalid
    #[error("Invalid block {block:?}: {reason}")]
    InvalidBlock {
        /// Offending block
        block: BlockId,
        /// Why it was rejected
        reason: String,
    },

    /// Context not found
    #[error("Context not found: {0:?}")]
    ContextNotFound(ContextId),

    /// Connection not found
    #[error("Connection not found: {0:?}")]
    ConnectionNotFound(ConnectionId),

    /// Connection rejected
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Custom event declaration rejected
    #[error(transparent)]
    CustomEvent(#[from] CustomEventError),

    /// Input has no connection, default or override
    #[error("Input '{port}' of block {block:?} has no value source")]
    UnresolvedInput {
        /// Block owning the input
        block: BlockId,
        /// Input name
        port: String,
    },

    /// Literal does not fit the port type
    #[error("Port '{port}' expects {expected}, got {found}")]
    TypeMismatch {
        /// Port name
        port: String,
        /// Declared type
        expected: PortType,
        /// Type of the literal
        found: PortType,
    },

    /// Resolution failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Structure could not be serialized
    #[error("Serialization error: {0}")]
    Format(#[from] ron::Error),

    /// Structure could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
}
