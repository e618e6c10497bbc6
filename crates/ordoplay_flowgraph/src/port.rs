// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for block inputs/outputs and the values that flow through them.

use crate::scene::MeshId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(pub Uuid);

impl PortId {
    /// Create a new random port ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// Data type that can flow through ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// Execution signal (carries no value)
    Exec,
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// 2D vector
    Vector2,
    /// 3D vector
    Vector3,
    /// 4D vector
    Vector4,
    /// Color (RGBA)
    Color,
    /// String value
    String,
    /// Scene mesh reference
    Mesh,
    /// Any type (for generic blocks)
    Any,
}

impl PortType {
    /// Whether this is an execution signal rather than a data type
    pub fn is_exec(&self) -> bool {
        matches!(self, Self::Exec)
    }

    /// The value a port of this type reads when nothing else provides one.
    ///
    /// `Exec` and `Any` have no meaningful default.
    pub fn default_value(&self) -> Option<PortValue> {
        match self {
            Self::Exec | Self::Any => None,
            Self::Bool => Some(PortValue::Bool(false)),
            Self::Int => Some(PortValue::Int(0)),
            Self::Float => Some(PortValue::Float(0.0)),
            Self::Vector2 => Some(PortValue::Vector2([0.0; 2])),
            Self::Vector3 => Some(PortValue::Vector3([0.0; 3])),
            Self::Vector4 => Some(PortValue::Vector4([0.0; 4])),
            Self::Color => Some(PortValue::Color([0.0, 0.0, 0.0, 1.0])),
            Self::String => Some(PortValue::String(String::new())),
            Self::Mesh => Some(PortValue::Mesh(None)),
        }
    }

    /// Check if this type can connect to another type
    pub fn can_connect_to(&self, other: &PortType) -> bool {
        // Signals only ever pair with signals
        if self.is_exec() || other.is_exec() {
            return self == other;
        }

        if matches!(self, Self::Any) || matches!(other, Self::Any) {
            return true;
        }

        if self == other {
            return true;
        }

        // Implicit conversions
        match (self, other) {
            (Self::Int, Self::Float) | (Self::Float, Self::Int) => true,
            (Self::Float, Self::Vector2 | Self::Vector3 | Self::Vector4) => true,
            (Self::Vector2, Self::Vector3 | Self::Vector4) => true,
            (Self::Vector3, Self::Vector4) => true,
            (Self::Color, Self::Vector4) | (Self::Vector4, Self::Color) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exec => "exec",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Vector2 => "vector2",
            Self::Vector3 => "vector3",
            Self::Vector4 => "vector4",
            Self::Color => "color",
            Self::String => "string",
            Self::Mesh => "mesh",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// A port on a block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// Unique port ID
    pub id: PortId,
    /// Port name, unique per direction within a block
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Data type
    pub port_type: PortType,
    /// Default value (for inputs)
    pub default_value: Option<PortValue>,
    /// Whether this port must be connected (for inputs)
    pub required: bool,
    /// Whether multiple connections are allowed
    pub multi_connect: bool,
}

impl Port {
    /// Create a new input port
    pub fn input(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            id: PortId::new(),
            name: name.into(),
            direction: PortDirection::Input,
            port_type,
            default_value: None,
            required: false,
            // Single writer for data, single trigger source for signals
            multi_connect: false,
        }
    }

    /// Create a new output port
    pub fn output(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            id: PortId::new(),
            name: name.into(),
            direction: PortDirection::Output,
            port_type,
            default_value: None,
            required: false,
            multi_connect: true,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, value: PortValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Whether this port carries execution signals
    pub fn is_signal(&self) -> bool {
        self.port_type.is_exec()
    }

    /// The configured default, falling back to the type's default
    pub fn effective_default(&self) -> Option<PortValue> {
        self.default_value
            .clone()
            .or_else(|| self.port_type.default_value())
    }

    /// Check if a connection to another port is valid
    pub fn can_connect(&self, other: &Port) -> bool {
        if self.direction == other.direction {
            return false;
        }

        self.port_type.can_connect_to(&other.port_type)
    }
}

/// Value that can be stored in a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// 2D vector
    Vector2([f64; 2]),
    /// 3D vector
    Vector3([f64; 3]),
    /// 4D vector
    Vector4([f64; 4]),
    /// Color
    Color([f64; 4]),
    /// String
    String(String),
    /// Mesh reference, `None` when nothing is referenced
    Mesh(Option<MeshId>),
}

impl PortValue {
    /// Get the port type for this value
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Bool(_) => PortType::Bool,
            Self::Int(_) => PortType::Int,
            Self::Float(_) => PortType::Float,
            Self::Vector2(_) => PortType::Vector2,
            Self::Vector3(_) => PortType::Vector3,
            Self::Vector4(_) => PortType::Vector4,
            Self::Color(_) => PortType::Color,
            Self::String(_) => PortType::String,
            Self::Mesh(_) => PortType::Mesh,
        }
    }

    /// Convert this value to `target` using the declared implicit conversions.
    ///
    /// Returns `None` when the types are not compatible.
    pub fn coerce_to(&self, target: &PortType) -> Option<PortValue> {
        if matches!(target, PortType::Any) || self.port_type() == *target {
            return Some(self.clone());
        }

        match (self, target) {
            (Self::Int(v), PortType::Float) => Some(Self::Float(*v as f64)),
            (Self::Float(v), PortType::Int) => Some(Self::Int(v.trunc() as i64)),
            (Self::Float(v), PortType::Vector2) => Some(Self::Vector2([*v; 2])),
            (Self::Float(v), PortType::Vector3) => Some(Self::Vector3([*v; 3])),
            (Self::Float(v), PortType::Vector4) => Some(Self::Vector4([*v; 4])),
            (Self::Vector2([x, y]), PortType::Vector3) => Some(Self::Vector3([*x, *y, 0.0])),
            (Self::Vector2([x, y]), PortType::Vector4) => Some(Self::Vector4([*x, *y, 0.0, 0.0])),
            (Self::Vector3([x, y, z]), PortType::Vector4) => Some(Self::Vector4([*x, *y, *z, 0.0])),
            (Self::Color(c), PortType::Vector4) => Some(Self::Vector4(*c)),
            (Self::Vector4(v), PortType::Color) => Some(Self::Color(*v)),
            _ => None,
        }
    }

    /// Interpret the value as a boolean condition
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

fn write_components(f: &mut fmt::Formatter<'_>, components: &[f64]) -> fmt::Result {
    f.write_str("(")?;
    for (i, c) in components.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str(")")
}

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Vector2(v) => write_components(f, v),
            Self::Vector3(v) => write_components(f, v),
            Self::Vector4(v) | Self::Color(v) => write_components(f, v),
            Self::String(v) => f.write_str(v),
            Self::Mesh(Some(id)) => write!(f, "mesh:{}", id.0),
            Self::Mesh(None) => f.write_str("mesh:none"),
        }
    }
}

impl From<bool> for PortValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PortValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PortValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PortValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PortValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
