// SPDX-License-Identifier: MIT OR Apache-2.0
//! Block definitions for the flow graph.
//!
//! A block is one of three capability kinds:
//! - data blocks expose typed outputs computed from their inputs on demand
//! - execution blocks are activated through a signal input and fire signal outputs
//! - event blocks are execution blocks without a signal input, activated by
//!   scene notifications or custom events

use crate::custom_event::EventSchema;
use crate::port::{Port, PortDirection, PortId, PortType, PortValue};
use crate::scene::MeshId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known port names
pub mod ports {
    /// Signal input of execution blocks
    pub const IN: &str = "in";
    /// Signal output of execution blocks
    pub const OUT: &str = "out";
    /// Signal output of event blocks
    pub const DONE: &str = "done";
    /// Console log message
    pub const MESSAGE: &str = "message";
    /// Generic value port
    pub const VALUE: &str = "value";
    /// Constant output
    pub const OUTPUT: &str = "output";
    /// Branch condition
    pub const CONDITION: &str = "condition";
    /// Branch taken when the condition holds
    pub const ON_TRUE: &str = "on_true";
    /// Branch taken otherwise
    pub const ON_FALSE: &str = "on_false";
    /// Left operand
    pub const A: &str = "a";
    /// Right operand
    pub const B: &str = "b";
    /// Mesh that was hit by a pick
    pub const PICKED_MESH: &str = "picked_mesh";
    /// Pointer that produced a pick
    pub const POINTER_ID: &str = "pointer_id";

    /// Name of the `index`-th sequence output
    pub fn sequence_out(index: usize) -> String {
        format!("out_{index}")
    }
}

/// Unique identifier for a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub Uuid);

impl BlockId {
    /// Create a new random block ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a block can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockCapability {
    /// Pure, pull-based value producer
    Data,
    /// Signal-driven action
    Execution,
    /// Graph entry point
    Event,
}

/// Numeric type accepted by arithmetic blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericType {
    /// Integer arithmetic
    Int,
    /// Floating point arithmetic
    Float,
}

impl NumericType {
    /// Port type used for operands and result
    pub fn port_type(self) -> PortType {
        match self {
            Self::Int => PortType::Int,
            Self::Float => PortType::Float,
        }
    }
}

/// Arithmetic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    /// a + b
    Add,
    /// a - b
    Subtract,
    /// a * b
    Multiply,
    /// a / b
    Divide,
}

/// Block behavior, one variant per block kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Fires once when the scene becomes ready
    SceneReadyEvent,
    /// Fires when `target` or one of its descendants is picked
    MeshPickEvent {
        /// Mesh this block listens on
        target: MeshId,
        /// Stop bubbling to ancestors once this block fired
        stop_propagation: bool,
    },
    /// Fires when a custom event with `event_id` is sent
    ReceiveCustomEvent {
        /// Channel key
        event_id: String,
        /// Fields exposed as data outputs
        event_data: EventSchema,
    },
    /// Sends a custom event built from its data inputs
    SendCustomEvent {
        /// Channel key
        event_id: String,
        /// Fields read from data inputs
        event_data: EventSchema,
    },
    /// Emits its message to the diagnostic sink
    ConsoleLog,
    /// Stores a value in a context variable
    SetVariable {
        /// Variable name
        variable: String,
    },
    /// Fires `on_true` or `on_false`
    Branch,
    /// Fires `out_0..out_n` in order
    Sequence {
        /// Number of outputs
        outputs: usize,
    },
    /// Outputs a literal value
    Constant {
        /// The literal
        value: PortValue,
    },
    /// Reads a context variable
    GetVariable {
        /// Variable name
        variable: String,
        /// Declared type of the variable
        value_type: PortType,
    },
    /// Combines two numbers
    Arithmetic {
        /// Operation
        op: ArithmeticOp,
        /// Operand and result type
        value_type: NumericType,
    },
}

impl BlockKind {
    /// Capability of this kind
    pub fn capability(&self) -> BlockCapability {
        match self {
            Self::SceneReadyEvent | Self::MeshPickEvent { .. } | Self::ReceiveCustomEvent { .. } => {
                BlockCapability::Event
            }
            Self::SendCustomEvent { .. }
            | Self::ConsoleLog
            | Self::SetVariable { .. }
            | Self::Branch
            | Self::Sequence { .. } => BlockCapability::Execution,
            Self::Constant { .. } | Self::GetVariable { .. } | Self::Arithmetic { .. } => {
                BlockCapability::Data
            }
        }
    }

    /// Default display name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SceneReadyEvent => "Scene Ready Event",
            Self::MeshPickEvent { .. } => "Mesh Pick Event",
            Self::ReceiveCustomEvent { .. } => "Receive Custom Event",
            Self::SendCustomEvent { .. } => "Send Custom Event",
            Self::ConsoleLog => "Console Log",
            Self::SetVariable { .. } => "Set Variable",
            Self::Branch => "Branch",
            Self::Sequence { .. } => "Sequence",
            Self::Constant { .. } => "Constant",
            Self::GetVariable { .. } => "Get Variable",
            Self::Arithmetic { .. } => "Arithmetic",
        }
    }

    /// Custom event declaration carried by this kind, if any
    pub fn custom_event(&self) -> Option<(&str, &EventSchema)> {
        match self {
            Self::ReceiveCustomEvent { event_id, event_data }
            | Self::SendCustomEvent { event_id, event_data } => Some((event_id, event_data)),
            _ => None,
        }
    }

    fn ports(&self) -> (Vec<Port>, Vec<Port>) {
        use crate::block::ports::*;

        match self {
            Self::SceneReadyEvent => (vec![], vec![Port::output(DONE, PortType::Exec)]),
            Self::MeshPickEvent { .. } => (
                vec![],
                vec![
                    Port::output(DONE, PortType::Exec),
                    Port::output(PICKED_MESH, PortType::Mesh),
                    Port::output(POINTER_ID, PortType::Int),
                ],
            ),
            Self::ReceiveCustomEvent { event_data, .. } => {
                let mut outputs = vec![Port::output(DONE, PortType::Exec)];
                outputs.extend(
                    event_data
                        .fields()
                        .map(|(name, ty)| Port::output(name, ty.clone())),
                );
                (vec![], outputs)
            }
            Self::SendCustomEvent { event_data, .. } => {
                let mut inputs = vec![Port::input(IN, PortType::Exec)];
                inputs.extend(
                    event_data
                        .fields()
                        .map(|(name, ty)| Port::input(name, ty.clone())),
                );
                (inputs, vec![Port::output(OUT, PortType::Exec)])
            }
            Self::ConsoleLog => (
                vec![
                    Port::input(IN, PortType::Exec),
                    Port::input(MESSAGE, PortType::Any),
                ],
                vec![Port::output(OUT, PortType::Exec)],
            ),
            Self::SetVariable { .. } => (
                vec![
                    Port::input(IN, PortType::Exec),
                    Port::input(VALUE, PortType::Any),
                ],
                vec![Port::output(OUT, PortType::Exec)],
            ),
            Self::Branch => (
                vec![
                    Port::input(IN, PortType::Exec),
                    Port::input(CONDITION, PortType::Bool),
                ],
                vec![
                    Port::output(ON_TRUE, PortType::Exec),
                    Port::output(ON_FALSE, PortType::Exec),
                ],
            ),
            Self::Sequence { outputs } => (
                vec![Port::input(IN, PortType::Exec)],
                (0..*outputs)
                    .map(|i| Port::output(sequence_out(i), PortType::Exec))
                    .collect(),
            ),
            Self::Constant { value } => (vec![], vec![Port::output(OUTPUT, value.port_type())]),
            Self::GetVariable { value_type, .. } => {
                (vec![], vec![Port::output(VALUE, value_type.clone())])
            }
            Self::Arithmetic { value_type, .. } => {
                let ty = value_type.port_type();
                (
                    vec![Port::input(A, ty.clone()), Port::input(B, ty.clone())],
                    vec![Port::output(VALUE, ty)],
                )
            }
        }
    }
}

/// A block instance in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Unique instance ID
    pub id: BlockId,
    /// Display name (can be customized)
    pub name: String,
    /// Behavior
    pub kind: BlockKind,
    /// Input ports (signals and data)
    pub inputs: Vec<Port>,
    /// Output ports (signals and data)
    pub outputs: Vec<Port>,
}

impl Block {
    /// Create a block of the given kind with its declared ports
    pub fn new(kind: BlockKind) -> Self {
        let (inputs, outputs) = kind.ports();
        Self {
            id: BlockId::new(),
            name: kind.type_name().to_string(),
            kind,
            inputs,
            outputs,
        }
    }

    /// Scene-ready event block
    pub fn scene_ready_event() -> Self {
        Self::new(BlockKind::SceneReadyEvent)
    }

    /// Mesh-pick event block bound to `target`
    pub fn mesh_pick_event(target: MeshId) -> Self {
        Self::new(BlockKind::MeshPickEvent {
            target,
            stop_propagation: false,
        })
    }

    /// Custom event receiver
    pub fn receive_custom_event(event_id: impl Into<String>, event_data: EventSchema) -> Self {
        Self::new(BlockKind::ReceiveCustomEvent {
            event_id: event_id.into(),
            event_data,
        })
    }

    /// Custom event sender
    pub fn send_custom_event(event_id: impl Into<String>, event_data: EventSchema) -> Self {
        Self::new(BlockKind::SendCustomEvent {
            event_id: event_id.into(),
            event_data,
        })
    }

    /// Console log sink
    pub fn console_log() -> Self {
        Self::new(BlockKind::ConsoleLog)
    }

    /// Variable setter
    pub fn set_variable(variable: impl Into<String>) -> Self {
        Self::new(BlockKind::SetVariable {
            variable: variable.into(),
        })
    }

    /// Conditional branch
    pub fn branch() -> Self {
        Self::new(BlockKind::Branch)
    }

    /// Ordered fan-out
    pub fn sequence(outputs: usize) -> Self {
        Self::new(BlockKind::Sequence { outputs })
    }

    /// Literal value
    pub fn constant(value: impl Into<PortValue>) -> Self {
        Self::new(BlockKind::Constant {
            value: value.into(),
        })
    }

    /// Variable getter
    pub fn get_variable(variable: impl Into<String>, value_type: PortType) -> Self {
        Self::new(BlockKind::GetVariable {
            variable: variable.into(),
            value_type,
        })
    }

    /// Arithmetic operation
    pub fn arithmetic(op: ArithmeticOp, value_type: NumericType) -> Self {
        Self::new(BlockKind::Arithmetic { op, value_type })
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stop pick bubbling after this block fires (mesh-pick blocks only)
    pub fn with_stop_propagation(mut self, stop: bool) -> Self {
        if let BlockKind::MeshPickEvent {
            stop_propagation, ..
        } = &mut self.kind
        {
            *stop_propagation = stop;
        }
        self
    }

    /// Set the default value of a data input
    pub fn with_input_default(mut self, name: &str, value: PortValue) -> Self {
        if let Some(port) = self
            .inputs
            .iter_mut()
            .find(|p| p.name == name && !p.is_signal())
        {
            port.default_value = Some(value);
        }
        self
    }

    /// Capability of this block
    pub fn capability(&self) -> BlockCapability {
        self.kind.capability()
    }

    /// Whether this block is a graph entry point
    pub fn is_event(&self) -> bool {
        self.capability() == BlockCapability::Event
    }

    /// Get an input port by name
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Get an output port by name
    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Get a port by name and direction
    pub fn port_named(&self, name: &str, direction: PortDirection) -> Option<&Port> {
        match direction {
            PortDirection::Input => self.input(name),
            PortDirection::Output => self.output(name),
        }
    }

    /// Get a port by ID
    pub fn port(&self, port_id: &PortId) -> Option<&Port> {
        self.inputs
            .iter()
            .find(|p| p.id == *port_id)
            .or_else(|| self.outputs.iter().find(|p| p.id == *port_id))
    }

    /// Get all ports
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Data inputs only
    pub fn data_inputs(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().filter(|p| !p.is_signal())
    }

    /// Data outputs only
    pub fn data_outputs(&self) -> impl Iterator<Item = &Port> {
        self.outputs.iter().filter(|p| !p.is_signal())
    }
}
