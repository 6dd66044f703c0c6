use std::collections::BTreeMap;

use glam::Vec3;

use crate::error::ScriptError;
use crate::handle::EntityHandle;

/// A value that may live in a script variable table.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    String(String),
    Entity(EntityHandle),
    Vector(Vec3),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Integer(_) | ScriptValue::Number(_) => "number",
            ScriptValue::Boolean(_) => "boolean",
            ScriptValue::String(_) => "string",
            ScriptValue::Entity(_) => "entity",
            ScriptValue::Vector(_) => "vector",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// `script.vars`: cleared on every level load.
    Ephemeral,
    /// `script.persistent`: survives level changes, cleared on a new game.
    Persistent,
}

impl VariableKind {
    pub fn label(self) -> &'static str {
        match self {
            VariableKind::Ephemeral => "script",
            VariableKind::Persistent => "persistent",
        }
    }

    fn allowed(self) -> &'static str {
        match self {
            VariableKind::Ephemeral => "number, string, boolean, entity, or vector",
            VariableKind::Persistent => "number, string, or boolean",
        }
    }

    pub fn allows(self, value: &ScriptValue) -> bool {
        match value {
            ScriptValue::Entity(_) | ScriptValue::Vector(_) => self == VariableKind::Ephemeral,
            _ => true,
        }
    }

    pub(crate) fn type_error(self) -> ScriptError {
        ScriptError::VariableType {
            kind: self.label(),
            allowed: self.allowed(),
        }
    }
}

/// String-keyed typed store behind `script.vars` and `script.persistent`.
#[derive(Debug, Clone)]
pub struct VariableTable {
    kind: VariableKind,
    entries: BTreeMap<String, ScriptValue>,
}

impl VariableTable {
    pub fn new(kind: VariableKind) -> Self {
        VariableTable {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.entries.get(key)
    }

    /// `None` removes the key. A disallowed value leaves the table as it was.
    pub fn set(&mut self, key: &str, value: Option<ScriptValue>) -> Result<(), ScriptError> {
        match value {
            None => {
                self.entries.remove(key);
            }
            Some(value) if self.kind.allows(&value) => {
                self.entries.insert(key.to_string(), value);
            }
            Some(_) => return Err(self.kind.type_error()),
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScriptValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Moves every entry of `other` in, replacing same-named keys.
    pub(crate) fn absorb(&mut self, other: VariableTable) {
        debug_assert_eq!(self.kind, other.kind);
        self.entries.extend(other.entries);
    }
}
