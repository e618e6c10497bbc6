// SPDX-License-Identifier: MIT OR Apache-2.0
//! Diagnostic output for console-log blocks.

use crate::port::PortValue;
use std::cell::RefCell;
use std::rc::Rc;

/// Tracing target used for console-log output
pub const CONSOLE_TARGET: &str = "flowgraph::console";

/// Fire-and-forget destination for logged values
pub trait DiagnosticSink {
    /// Emit one value
    fn log(&self, value: &PortValue);
}

/// Sink that forwards values to `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(&self, value: &PortValue) {
        tracing::info!(target: CONSOLE_TARGET, "{value}");
    }
}

/// Sink that keeps every logged value in memory.
///
/// Clones share the same buffer, so a clone can be handed to a coordinator
/// while the original is kept for inspection.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    entries: Rc<RefCell<Vec<PortValue>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Logged values, oldest first
    pub fn entries(&self) -> Vec<PortValue> {
        self.entries.borrow().clone()
    }

    /// Logged values rendered as console text
    pub fn messages(&self) -> Vec<String> {
        self.entries.borrow().iter().map(ToString::to_string).collect()
    }

    /// Drop everything logged so far
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn log(&self, value: &PortValue) {
        tracing::trace!(target: CONSOLE_TARGET, "{value}");
        self.entries.borrow_mut().push(value.clone());
    }
}
