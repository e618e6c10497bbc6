// SPDX-License-Identifier: MIT OR Apache-2.0
//! Signal propagation and data resolution.
//!
//! Firing a signal output walks the connected execution blocks depth-first in
//! connection order. Data inputs are pulled lazily: reading one resolves the
//! upstream output, computing data blocks at most once per activation.

use crate::block::{ports, ArithmeticOp, Block, BlockCapability, BlockId, BlockKind};
use crate::connection::{Connection, ConnectionId, LinkKind};
use crate::context::ExecutionContext;
use crate::custom_event::CustomEvent;
use crate::graph::GraphId;
use crate::port::{Port, PortId, PortType, PortValue};
use crate::sink::DiagnosticSink;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

/// Error raised while propagating through a graph
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// Block not found
    #[error("Block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// Port not found on a block
    #[error("Block {block:?} has no port '{port}'")]
    PortNotFound {
        /// Block that was queried
        block: BlockId,
        /// Requested port name
        port: String,
    },

    /// Input has no connection, override or default
    #[error("Input '{port}' of block {block:?} has no value")]
    MissingInput {
        /// Block owning the input
        block: BlockId,
        /// Input name
        port: String,
    },

    /// Value cannot be converted to the port type
    #[error("Port '{port}' expects {expected}, got {found}")]
    TypeMismatch {
        /// Port name
        port: String,
        /// Declared type
        expected: PortType,
        /// Type of the offending value
        found: PortType,
    },

    /// Variable is not set and its type has no default
    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    /// Integer division by zero
    #[error("Division by zero in block {0:?}")]
    DivisionByZero(BlockId),

    /// Too many nested activations
    #[error("Execution depth limit of {0} exceeded")]
    DepthExceeded(usize),

    /// Block cannot be activated through a signal
    #[error("Block {0:?} has no signal input")]
    NotActivatable(BlockId),

    /// Custom event payload lacks a declared field
    #[error("Custom event '{event_id}' is missing field '{field}'")]
    MissingEventField {
        /// Event channel
        event_id: String,
        /// Offending field
        field: String,
    },

    /// Custom event payload field has the wrong type
    #[error("Custom event '{event_id}' field '{field}' expects {expected}, got {found}")]
    EventFieldType {
        /// Event channel
        event_id: String,
        /// Offending field
        field: String,
        /// Declared type
        expected: PortType,
        /// Type received
        found: PortType,
    },

    /// Graph was already borrowed when a notification arrived
    #[error("Graph {0:?} is busy")]
    GraphBusy(GraphId),
}

/// Everything propagation needs from outside the graph
pub(crate) struct ExecutionEnv<'a> {
    /// Destination for console-log blocks
    pub sink: &'a dyn DiagnosticSink,
    /// Outgoing custom events
    pub outbox: &'a RefCell<VecDeque<CustomEvent>>,
    /// Nested activation limit
    pub max_depth: usize,
}

/// Walks one graph within one context
pub(crate) struct Executor<'a> {
    blocks: &'a IndexMap<BlockId, Block>,
    connections: &'a IndexMap<ConnectionId, Connection>,
    env: &'a ExecutionEnv<'a>,
    context: &'a mut ExecutionContext,
    depth: usize,
}

impl<'a> Executor<'a> {
    pub fn new(
        blocks: &'a IndexMap<BlockId, Block>,
        connections: &'a IndexMap<ConnectionId, Connection>,
        env: &'a ExecutionEnv<'a>,
        context: &'a mut ExecutionContext,
    ) -> Self {
        Self {
            blocks,
            connections,
            env,
            context,
            depth: 0,
        }
    }

    fn block(&self, block_id: BlockId) -> Result<&'a Block, ExecutionError> {
        let blocks: &'a IndexMap<BlockId, Block> = self.blocks;
        blocks
            .get(&block_id)
            .ok_or(ExecutionError::BlockNotFound(block_id))
    }

    fn input_port(&self, block: &'a Block, name: &str) -> Result<&'a Port, ExecutionError> {
        block.input(name).ok_or_else(|| ExecutionError::PortNotFound {
            block: block.id,
            port: name.to_string(),
        })
    }

    /// Fire the signal output `port` of `block_id`
    pub fn fire_signal(&mut self, block_id: BlockId, port: &str) -> Result<(), ExecutionError> {
        let block = self.block(block_id)?;
        let output = block
            .output(port)
            .filter(|p| p.is_signal())
            .ok_or_else(|| ExecutionError::PortNotFound {
                block: block_id,
                port: port.to_string(),
            })?;

        let connections: &'a IndexMap<ConnectionId, Connection> = self.connections;
        for connection in connections
            .values()
            .filter(|c| c.kind == LinkKind::Signal && c.from_port == output.id)
        {
            self.activate(connection.to_block)?;
        }
        Ok(())
    }

    fn activate(&mut self, block_id: BlockId) -> Result<(), ExecutionError> {
        if self.depth >= self.env.max_depth {
            return Err(ExecutionError::DepthExceeded(self.env.max_depth));
        }
        self.depth += 1;
        let result = self.run_block(block_id);
        self.depth -= 1;
        result
    }

    fn run_block(&mut self, block_id: BlockId) -> Result<(), ExecutionError> {
        let block = self.block(block_id)?;
        tracing::trace!(block = ?block_id, name = %block.name, "Activating block");

        match &block.kind {
            BlockKind::ConsoleLog => {
                let message = self.read_input(block_id, ports::MESSAGE)?;
                self.env.sink.log(&message);
                self.fire_signal(block_id, ports::OUT)
            }
            BlockKind::SetVariable { variable } => {
                let value = self.read_input(block_id, ports::VALUE)?;
                self.context.set_variable(variable.clone(), value);
                self.fire_signal(block_id, ports::OUT)
            }
            BlockKind::Branch => {
                let condition = self.read_input(block_id, ports::CONDITION)?;
                if condition.as_bool().unwrap_or(false) {
                    self.fire_signal(block_id, ports::ON_TRUE)
                } else {
                    self.fire_signal(block_id, ports::ON_FALSE)
                }
            }
            BlockKind::Sequence { outputs } => {
                for index in 0..*outputs {
                    self.fire_signal(block_id, &ports::sequence_out(index))?;
                }
                Ok(())
            }
            BlockKind::SendCustomEvent {
                event_id,
                event_data,
            } => {
                let mut event = CustomEvent::new(event_id.clone());
                for (field, _) in event_data.fields() {
                    let value = self.read_input(block_id, field)?;
                    event.payload.insert(field.to_string(), value);
                }
                tracing::debug!(event_id = %event_id, "Queued custom event");
                self.env.outbox.borrow_mut().push_back(event);
                self.fire_signal(block_id, ports::OUT)
            }
            _ => Err(ExecutionError::NotActivatable(block_id)),
        }
    }

    /// Resolve a data input of `block_id`.
    ///
    /// Order: upstream connection, context override, configured default,
    /// type default.
    pub fn read_input(&mut self, block_id: BlockId, name: &str) -> Result<PortValue, ExecutionError> {
        let block = self.block(block_id)?;
        let port = self.input_port(block, name)?;

        let connections: &'a IndexMap<ConnectionId, Connection> = self.connections;
        let upstream = connections
            .values()
            .find(|c| c.kind == LinkKind::Data && c.to_port == port.id);

        let value = match upstream {
            Some(connection) => self.read_output(connection.from_block, connection.from_port)?,
            None => match self.context.value_of(port.id) {
                Some(value) => value.clone(),
                None => port
                    .effective_default()
                    .ok_or_else(|| ExecutionError::MissingInput {
                        block: block_id,
                        port: name.to_string(),
                    })?,
            },
        };

        value
            .coerce_to(&port.port_type)
            .ok_or_else(|| ExecutionError::TypeMismatch {
                port: name.to_string(),
                expected: port.port_type.clone(),
                found: value.port_type(),
            })
    }

    fn read_output(&mut self, block_id: BlockId, port_id: PortId) -> Result<PortValue, ExecutionError> {
        let block = self.block(block_id)?;

        if block.capability() != BlockCapability::Data {
            // Event and execution outputs are written into the context when they fire
            return match self.context.event_value(port_id) {
                Some(value) => Ok(value.clone()),
                None => block
                    .port(&port_id)
                    .and_then(Port::effective_default)
                    .ok_or_else(|| ExecutionError::MissingInput {
                        block: block_id,
                        port: format!("{port_id:?}"),
                    }),
            };
        }

        if let Some(value) = self.context.cached_output(block_id, port_id) {
            return Ok(value.clone());
        }

        let values = self.compute(block)?;
        let value = values
            .get(&port_id)
            .cloned()
            .ok_or_else(|| ExecutionError::PortNotFound {
                block: block_id,
                port: format!("{port_id:?}"),
            })?;
        self.context.store_outputs(block_id, values);
        Ok(value)
    }

    fn compute(&mut self, block: &'a Block) -> Result<HashMap<PortId, PortValue>, ExecutionError> {
        let mut values = HashMap::new();

        match &block.kind {
            BlockKind::Constant { value } => {
                for port in block.data_outputs() {
                    values.insert(port.id, value.clone());
                }
            }
            BlockKind::GetVariable {
                variable,
                value_type,
            } => {
                let value = match self.context.get_variable(variable) {
                    Some(value) => value.clone(),
                    None => value_type
                        .default_value()
                        .ok_or_else(|| ExecutionError::UnknownVariable(variable.clone()))?,
                };
                for port in block.data_outputs() {
                    values.insert(port.id, value.clone());
                }
            }
            BlockKind::Arithmetic { op, .. } => {
                let a = self.read_input(block.id, ports::A)?;
                let b = self.read_input(block.id, ports::B)?;
                let result = arithmetic(block.id, *op, &a, &b)?;
                for port in block.data_outputs() {
                    values.insert(port.id, result.clone());
                }
            }
            _ => {}
        }

        Ok(values)
    }
}

fn arithmetic(
    block: BlockId,
    op: ArithmeticOp,
    a: &PortValue,
    b: &PortValue,
) -> Result<PortValue, ExecutionError> {
    match (a, b) {
        (PortValue::Int(a), PortValue::Int(b)) => {
            let value = match op {
                ArithmeticOp::Add => a.wrapping_add(*b),
                ArithmeticOp::Subtract => a.wrapping_sub(*b),
                ArithmeticOp::Multiply => a.wrapping_mul(*b),
                ArithmeticOp::Divide => {
                    if *b == 0 {
                        return Err(ExecutionError::DivisionByZero(block));
                    }
                    a.wrapping_div(*b)
                }
            };
            Ok(PortValue::Int(value))
        }
        (PortValue::Float(a), PortValue::Float(b)) => {
            let value = match op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Subtract => a - b,
                ArithmeticOp::Multiply => a * b,
                ArithmeticOp::Divide => a / b,
            };
            Ok(PortValue::Float(value))
        }
        _ => Err(ExecutionError::TypeMismatch {
            port: ports::B.to_string(),
            expected: a.port_type(),
            found: b.port_type(),
        }),
    }
}
