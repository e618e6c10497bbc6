// SPDX-License-Identifier: MIT OR Apache-2.0
//! Outcome of delivering one notification to the graphs of a coordinator.

use crate::block::BlockId;
use crate::context::ContextId;
use crate::execution::ExecutionError;
use crate::graph::GraphId;

/// One event block firing in one context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredEvent {
    /// Graph owning the block
    pub graph: GraphId,
    /// Event block that fired
    pub block: BlockId,
    /// Context it fired in
    pub context: ContextId,
}

/// A dispatch branch that failed
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchError {
    /// Graph the branch ran in
    pub graph: GraphId,
    /// Event block at the root of the branch, if known
    pub block: Option<BlockId>,
    /// What went wrong
    pub error: ExecutionError,
}

/// Everything that happened while dispatching a notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Successful firings, in firing order
    pub fired: Vec<FiredEvent>,
    /// Failed branches, in failure order
    pub errors: Vec<DispatchError>,
    /// Custom events delivered as a consequence
    pub custom_events_delivered: usize,
}

impl DispatchReport {
    /// Whether no branch failed
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of successful firings
    pub fn fired_count(&self) -> usize {
        self.fired.len()
    }

    /// Event blocks that fired, in order (one entry per context)
    pub fn fired_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.fired.iter().map(|f| f.block)
    }

    /// Append another report
    pub fn merge(&mut self, other: DispatchReport) {
        self.fired.extend(other.fired);
        self.errors.extend(other.errors);
        self.custom_events_delivered += other.custom_events_delivered;
    }

    pub(crate) fn record_fired(&mut self, graph: GraphId, block: BlockId, context: ContextId) {
        self.fired.push(FiredEvent {
            graph,
            block,
            context,
        });
    }

    pub(crate) fn record_error(&mut self, graph: GraphId, block: Option<BlockId>, error: ExecutionError) {
        tracing::error!(graph = ?graph, block = ?block, "Flow graph branch failed: {error}");
        self.errors.push(DispatchError {
            graph,
            block,
            error,
        });
    }
}
