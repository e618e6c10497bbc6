// SPDX-License-Identifier: MIT OR Apache-2.0
//! Custom events: named, typed signals exchanged between graphs.
//!
//! A send block and every receive block sharing an `event_id` must declare the
//! same fields. Declarations are checked when blocks are added to a graph; the
//! payload is checked again on delivery so host-originated events are covered.

use crate::port::{PortType, PortValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared fields of a custom event, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSchema {
    fields: IndexMap<String, PortType>,
}

impl EventSchema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field
    pub fn with_field(mut self, name: impl Into<String>, field_type: PortType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Get the declared type of a field
    pub fn get(&self, name: &str) -> Option<&PortType> {
        self.fields.get(name)
    }

    /// Iterate over `(name, type)` pairs
    pub fn fields(&self) -> impl Iterator<Item = (&str, &PortType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// Number of declared fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Name of the first field on which two declarations disagree.
    pub fn first_conflict(&self, other: &EventSchema) -> Option<String> {
        for (name, ty) in &self.fields {
            match other.fields.get(name) {
                Some(other_ty) if ty.can_connect_to(other_ty) => {}
                _ => return Some(name.clone()),
            }
        }
        other
            .fields
            .keys()
            .find(|name| !self.fields.contains_key(*name))
            .cloned()
    }
}

/// A custom event in flight
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    /// Channel key shared by senders and receivers
    pub event_id: String,
    /// Field values by name
    pub payload: IndexMap<String, PortValue>,
}

impl CustomEvent {
    /// Create an event with an empty payload
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            payload: IndexMap::new(),
        }
    }

    /// Add a field value
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<PortValue>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }
}

/// Errors raised by custom event declarations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CustomEventError {
    /// Two blocks declare the same event with different fields
    #[error("Custom event '{event_id}' declared with conflicting field '{field}'")]
    SchemaConflict {
        /// Event channel
        event_id: String,
        /// Offending field
        field: String,
    },
}

/// Live declarations of every custom event wired under one event bus.
///
/// Each block's declaration is kept, so a wide `Any` field cannot let two
/// incompatible narrower declarations in through it.
#[derive(Debug, Default)]
pub(crate) struct SchemaRegistry {
    entries: HashMap<String, Vec<EventSchema>>,
}

impl SchemaRegistry {
    /// Check a declaration against every live one without recording it
    pub fn check(&self, event_id: &str, schema: &EventSchema) -> Result<(), CustomEventError> {
        let Some(declared) = self.entries.get(event_id) else {
            return Ok(());
        };
        match declared.iter().find_map(|existing| existing.first_conflict(schema)) {
            Some(field) => Err(CustomEventError::SchemaConflict {
                event_id: event_id.to_string(),
                field,
            }),
            None => Ok(()),
        }
    }

    /// Record a declaration, failing if it conflicts with a live one
    pub fn register(&mut self, event_id: &str, schema: &EventSchema) -> Result<(), CustomEventError> {
        self.check(event_id, schema)?;
        self.entries
            .entry(event_id.to_string())
            .or_default()
            .push(schema.clone());
        Ok(())
    }

    /// Drop one declaration of `event_id` equal to `schema`
    pub fn unregister(&mut self, event_id: &str, schema: &EventSchema) {
        if let Some(declared) = self.entries.get_mut(event_id) {
            if let Some(index) = declared.iter().position(|s| s == schema) {
                declared.swap_remove(index);
            }
            if declared.is_empty() {
                self.entries.remove(event_id);
            }
        }
    }

    /// Number of blocks declaring `event_id`
    pub fn users(&self, event_id: &str) -> usize {
        self.entries.get(event_id).map_or(0, Vec::len)
    }
}
