use std::path::PathBuf;

use thiserror::Error;

/// Contract violations raised back into the calling script as catchable
/// Lua errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("entity reference is no longer valid")]
    StaleEntity,
    #[error("entity of type {0} has no trigger function")]
    NotTriggerable(String),
    #[error("script triggered itself with no delay")]
    SelfTrigger,
    #[error("entity must be a player - is {0}")]
    NotAPlayer(String),
    #[error("entity cannot be a player")]
    IsAPlayer,
    #[error("invalid item classname {0}")]
    UnknownItem(String),
    #[error("invalid entity key {0}")]
    UnknownField(String),
    #[error("attempt to set a read-only value")]
    ReadOnly,
    #[error("attempt to search by non-string key")]
    NotSearchable,
    #[error("bad value for entity key {field}: {expected} expected, got {found}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("invalid key for {0} variable: must be string")]
    VariableKey(&'static str),
    #[error("invalid type for {kind} variable: must be {allowed}")]
    VariableType {
        kind: &'static str,
        allowed: &'static str,
    },
    #[error("invalid key for global variable: must be string")]
    GlobalKey,
    #[error("invalid type for global variable: must be function or table")]
    GlobalType,
    #[error("name for global variable cannot be 'script'")]
    ReservedGlobalName,
    #[error("global variable being added has the same name as an existing variable")]
    GlobalRedefinition,
    #[error("{0}")]
    Argument(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<ScriptError> for mlua::Error {
    fn from(err: ScriptError) -> Self {
        mlua::Error::external(err)
    }
}

/// Failures while loading a level's script. The engine stays usable but
/// reports every trigger as "not loaded" until the next successful load.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("loading script for level {level}: {source}")]
    Lua {
        level: String,
        #[source]
        source: mlua::Error,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodecError {
    #[error("variable {0} has no type separator")]
    MissingSeparator(String),
    #[error("variable {key} has unknown type {tag}")]
    UnknownType { key: String, tag: String },
    #[error("variable {key} has malformed {tag} value {text:?}")]
    Malformed {
        key: String,
        tag: &'static str,
        text: String,
    },
    #[error("variable {key} refers to entity {index} beyond the pool")]
    EntityOutOfRange { key: String, index: usize },
    #[error("variable {key}: {source}")]
    Disallowed {
        key: String,
        #[source]
        source: ScriptError,
    },
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no free entities")]
    Exhausted,
}
