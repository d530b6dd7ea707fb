//! Per-resolution state and the read-only views handed to hooks.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;

use super::FieldDefinition;
use super::GraphSpec;
use super::PRIVATE_PREFIX;
use crate::error::BlockedFields;
use crate::error::ConfigurationError;
use crate::error::HookError;

/// Key of the slot holding the caller's request, readable by every field.
pub(crate) const REQUEST_KEY: &str = "request";

static NULL: Value = Value::Null;

/// Result of reading a key from a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    Resolved(&'a Value),
    /// The field exists but has no value yet.
    Unresolved,
    /// No such field in the graph.
    Undefined,
}

/// Read-only view of the resolution, as it was when the current round started.
#[derive(Clone, Debug)]
pub struct Context {
    slots: Arc<HashMap<String, Option<Value>>>,
    rebound: Option<(String, Value)>,
}

impl Context {
    pub fn lookup(&self, key: &str) -> Lookup<'_> {
        if let Some((rebound, value)) = &self.rebound {
            if rebound == key {
                return Lookup::Resolved(value);
            }
        }
        match self.slots.get(key) {
            Some(Some(value)) => Lookup::Resolved(value),
            Some(None) => Lookup::Unresolved,
            None => Lookup::Undefined,
        }
    }

    /// The value of `key`, or the hook outcome that makes the pipeline retry or fail.
    pub fn get(&self, key: &str) -> Result<&Value, HookError> {
        match self.lookup(key) {
            Lookup::Resolved(value) => Ok(value),
            Lookup::Unresolved => Err(HookError::Unresolved(key.to_string())),
            Lookup::Undefined => Err(HookError::Undefined(key.to_string())),
        }
    }

    /// Deserializes the value of `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, HookError> {
        Ok(serde_json::from_value(self.get(key)?.clone())?)
    }

    /// The request the resolution was started with.
    pub fn request(&self) -> &Value {
        self.get(REQUEST_KEY).unwrap_or(&NULL)
    }

    /// The same view with `key` reading `value`.
    pub(crate) fn rebind(&self, key: &str, value: Value) -> Self {
        Self {
            slots: self.slots.clone(),
            rebound: Some((key.to_string(), value)),
        }
    }
}

#[derive(Debug)]
struct Slot<'g> {
    public: bool,
    definition: Option<&'g FieldDefinition>,
    value: Option<Value>,
    blocked_on: Option<String>,
}

/// Every field of one resolution, keyed without the private prefix.
#[derive(Debug)]
pub(crate) struct ResolutionContext<'g> {
    slots: IndexMap<String, Slot<'g>>,
}

impl<'g> ResolutionContext<'g> {
    pub(crate) fn new(graph: &'g GraphSpec, request: Value) -> Result<Self, ConfigurationError> {
        let mut slots = IndexMap::with_capacity(graph.len() + 1);
        slots.insert(
            REQUEST_KEY.to_string(),
            Slot {
                public: false,
                definition: None,
                value: Some(request),
                blocked_on: None,
            },
        );

        for (key, definition) in graph.iter() {
            let name = key.strip_prefix(PRIVATE_PREFIX).unwrap_or(key);
            if name == REQUEST_KEY {
                return Err(ConfigurationError::ReservedField(key.to_string()));
            }
            if slots.contains_key(name) {
                return Err(ConfigurationError::DuplicateField(name.to_string()));
            }
            slots.insert(
                name.to_string(),
                Slot {
                    public: name.len() == key.len(),
                    definition: Some(definition),
                    value: None,
                    blocked_on: None,
                },
            );
        }

        Ok(Self { slots })
    }

    /// Fields without a value yet, in declaration order.
    pub(crate) fn unresolved(&self) -> Vec<(String, &'g FieldDefinition)> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.value.is_none())
            .filter_map(|(key, slot)| Some((key.clone(), slot.definition?)))
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Context {
        Context {
            slots: Arc::new(
                self.slots
                    .iter()
                    .map(|(key, slot)| (key.clone(), slot.value.clone()))
                    .collect(),
            ),
            rebound: None,
        }
    }

    /// Sets the value of `key`; a field is resolved at most once.
    pub(crate) fn resolve(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.slots.get_mut(key) {
            debug_assert!(slot.value.is_none(), "field '{key}' resolved twice");
            if slot.value.is_none() {
                slot.value = Some(value);
                slot.blocked_on = None;
            }
        }
    }

    /// Remembers which dependency the last attempt of `key` waited on.
    pub(crate) fn block(&mut self, key: &str, dependency: String) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.blocked_on = Some(dependency);
        }
    }

    pub(crate) fn blocked(&self) -> BlockedFields {
        BlockedFields(
            self.slots
                .iter()
                .filter(|(_, slot)| slot.value.is_none())
                .map(|(key, slot)| (key.clone(), slot.blocked_on.clone()))
                .collect(),
        )
    }

    /// Public fields in declaration order, nulls left out when `skip_null` is set.
    pub(crate) fn into_output(self, skip_null: bool) -> Map<String, Value> {
        self.slots
            .into_iter()
            .filter(|(_, slot)| slot.public)
            .filter_map(|(key, slot)| Some((key, slot.value?)))
            .filter(|(_, value)| !(skip_null && value.is_null()))
            .collect()
    }
}
