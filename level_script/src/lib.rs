//! Level scripting for the entity/trigger system: a sandboxed Lua runtime
//! that triggers and is triggered by the native entity pool.

pub mod allocator;
pub mod config;
pub mod error;
pub mod handle;
pub mod lua_host;
pub mod pool;
pub mod string_pool;

pub use config::{PoolConfig, ScriptConfig};
pub use error::{CodecError, LoadError, PoolError, ScriptError};
pub use handle::EntityHandle;
pub use lua_host::{SavedVariables, ScriptEngine, ScriptValue, ScriptVector, VariableKind};
pub use pool::{EntityId, EntityPool};
