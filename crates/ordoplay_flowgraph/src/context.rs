// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution contexts.
//!
//! A context is an isolated sandbox for one logical run of a graph. It holds:
//! - user variables
//! - literal overrides for unconnected inputs
//! - values produced by event blocks when they fire
//! - memoized data-block outputs, valid for one activation
//! - per-pick bookkeeping for bubbling
//! - the state of every event block
//!
//! Nothing stored in one context is visible from another.

use crate::block::BlockId;
use crate::graph::GraphId;
use crate::port::{PortId, PortValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl ContextId {
    /// Create a new random context ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of an event block within one context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventBlockState {
    /// Not listening
    #[default]
    Idle,
    /// Listening for its trigger
    Armed,
    /// Currently propagating a notification
    Firing,
}

#[derive(Debug)]
struct MemoEntry {
    execution_id: u64,
    values: HashMap<PortId, PortValue>,
}

#[derive(Debug, Default)]
struct PickTracking {
    notification: Option<u64>,
    handled: Vec<BlockId>,
}

/// Per-run mutable state of a graph
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    graph: GraphId,
    variables: IndexMap<String, PortValue>,
    execution_id: u64,
    memo: HashMap<BlockId, MemoEntry>,
    compute_counts: HashMap<BlockId, u64>,
    overrides: HashMap<PortId, PortValue>,
    event_values: HashMap<PortId, PortValue>,
    event_states: HashMap<BlockId, EventBlockState>,
    pick: PickTracking,
}

impl ExecutionContext {
    pub(crate) fn new(graph: GraphId) -> Self {
        Self {
            id: ContextId::new(),
            graph,
            variables: IndexMap::new(),
            execution_id: 0,
            memo: HashMap::new(),
            compute_counts: HashMap::new(),
            overrides: HashMap::new(),
            event_values: HashMap::new(),
            event_states: HashMap::new(),
            pick: PickTracking::default(),
        }
    }

    /// Context ID
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Graph this context belongs to
    pub fn graph_id(&self) -> GraphId {
        self.graph
    }

    // Variables

    /// Set a variable
    pub fn set_variable(&mut self, name: impl Into<String>, value: PortValue) {
        self.variables.insert(name.into(), value);
    }

    /// Get a variable
    pub fn get_variable(&self, name: &str) -> Option<&PortValue> {
        self.variables.get(name)
    }

    /// Check whether a variable is set
    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Remove a variable, returning its value
    pub fn remove_variable(&mut self, name: &str) -> Option<PortValue> {
        self.variables.shift_remove(name)
    }

    /// Iterate over variables in insertion order
    pub fn variables(&self) -> impl Iterator<Item = (&str, &PortValue)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    // Activations and memoization

    /// Epoch of the current activation
    pub fn execution_id(&self) -> u64 {
        self.execution_id
    }

    /// Start a new activation; memoized outputs from earlier ones become stale
    pub(crate) fn begin_activation(&mut self) -> u64 {
        self.execution_id += 1;
        self.execution_id
    }

    pub(crate) fn cached_output(&self, block: BlockId, port: PortId) -> Option<&PortValue> {
        self.memo
            .get(&block)
            .filter(|entry| entry.execution_id == self.execution_id)
            .and_then(|entry| entry.values.get(&port))
    }

    pub(crate) fn store_outputs(&mut self, block: BlockId, values: HashMap<PortId, PortValue>) {
        *self.compute_counts.entry(block).or_insert(0) += 1;
        self.memo.insert(
            block,
            MemoEntry {
                execution_id: self.execution_id,
                values,
            },
        );
    }

    /// How many times a data block was computed in this context
    pub fn compute_count(&self, block: BlockId) -> u64 {
        self.compute_counts.get(&block).copied().unwrap_or(0)
    }

    // Port values

    /// Override an unconnected input with a literal value
    pub(crate) fn set_override(&mut self, port: PortId, value: PortValue) {
        self.overrides.insert(port, value);
    }

    /// Literal set on an input in this context, if any
    pub fn value_of(&self, port: PortId) -> Option<&PortValue> {
        self.overrides.get(&port)
    }

    pub(crate) fn has_override(&self, port: PortId) -> bool {
        self.overrides.contains_key(&port)
    }

    pub(crate) fn set_event_value(&mut self, port: PortId, value: PortValue) {
        self.event_values.insert(port, value);
    }

    pub(crate) fn event_value(&self, port: PortId) -> Option<&PortValue> {
        self.event_values.get(&port)
    }

    // Event blocks

    /// State of an event block in this context
    pub fn event_state(&self, block: BlockId) -> EventBlockState {
        self.event_states.get(&block).copied().unwrap_or_default()
    }

    pub(crate) fn set_event_state(&mut self, block: BlockId, state: EventBlockState) {
        self.event_states.insert(block, state);
    }

    pub(crate) fn disarm_all(&mut self) {
        self.event_states.clear();
    }

    // Picks

    /// Enter the scope of a pick notification. Entering the same one again is a no-op.
    pub(crate) fn begin_pick(&mut self, notification: u64) {
        if self.pick.notification != Some(notification) {
            self.pick.notification = Some(notification);
            self.pick.handled.clear();
        }
    }

    pub(crate) fn mark_pick_handled(&mut self, block: BlockId) {
        self.pick.handled.push(block);
    }

    /// Pick notification currently or last handled by this context
    pub fn current_pick(&self) -> Option<u64> {
        self.pick.notification
    }

    /// Blocks that handled the current pick notification, in firing order
    pub fn pick_handlers(&self) -> &[BlockId] {
        &self.pick.handled
    }

    /// Whether `block` already handled the current pick notification
    pub fn pick_handled_by(&self, block: BlockId) -> bool {
        self.pick.handled.contains(&block)
    }
}
