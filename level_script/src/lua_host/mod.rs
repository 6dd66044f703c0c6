use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fs;
use std::rc::Rc;

mod bindings;
mod context;
mod dispatch;
mod entity;
mod namespace;
mod save;
mod vector;

pub use context::{
    ScriptContext, ScriptValue, TriggerFrame, TriggerStack, VariableKind, VariableTable,
};
pub use save::{decode_table, decode_value, encode_value, SavedVariables};
pub use vector::ScriptVector;

use log::{debug, info, warn};
use mlua::{Lua, LuaOptions, RegistryKey, Result as LuaResult, StdLib, Table};
use serde_json::Value as JsonValue;

use crate::config::ScriptConfig;
use crate::error::{CodecError, LoadError, ScriptError};
use crate::pool::{EntityField, EntityId, EntityPool, EntitySpec, FieldKind, FieldValue, PoolEvent};
use crate::string_pool::StringPool;
use context::SharedContext;
use glam::Vec3;

/// The scripting engine for one game session: a Lua state, the entity pool
/// it drives, and the variables scripts keep between triggers.
pub struct ScriptEngine {
    lua: Lua,
    context: SharedContext,
    api: RegistryKey,
}

impl ScriptEngine {
    pub fn new(config: ScriptConfig) -> LuaResult<Self> {
        let lua = Lua::new_with(
            StdLib::MATH | StdLib::STRING | StdLib::TABLE,
            LuaOptions::default(),
        )?;
        let context: SharedContext = Rc::new(RefCell::new(ScriptContext::new(config)));
        lua.set_app_data(context.clone());

        let api = lua.create_table()?;
        bindings::install_api(&lua, context.clone(), &api)?;
        let api = namespace::finish_api(&lua, api)?;
        let api = lua.create_registry_value(api)?;
        Ok(ScriptEngine { lua, context, api })
    }

    /// Loads `<game_dir>/<script_dir>/<level>.<extension>`. On failure the
    /// engine stays in the not-loaded state until the next successful load.
    pub fn load_level(&self, level: &str) -> Result<(), LoadError> {
        let path = self.context.borrow().config.script_path(level);
        match fs::read_to_string(&path) {
            Ok(source) => self.load_level_source(level, &source),
            Err(source) => {
                self.reset_level_state();
                warn!("couldn't read script for level {level} at {}: {source}", path.display());
                Err(LoadError::Io { path, source })
            }
        }
    }

    /// Runs `source` as the script for `level`.
    pub fn load_level_source(&self, level: &str, source: &str) -> Result<(), LoadError> {
        self.reset_level_state();
        match self.run_level_chunk(level, source) {
            Ok(globals) => {
                let mut ctx = self.context.borrow_mut();
                ctx.globals = Some(globals);
                ctx.loaded_level = Some(level.to_string());
                info!("loaded script for level {level}");
                Ok(())
            }
            Err(source) => {
                warn!("error loading script for level {level}: {source}");
                Err(LoadError::Lua {
                    level: level.to_string(),
                    source,
                })
            }
        }
    }

    fn reset_level_state(&self) {
        self.context.borrow_mut().reset_for_level();
        self.lua.expire_registry_values();
        if let Err(err) = self.lua.gc_collect() {
            debug!("script garbage collection failed: {err}");
        }
    }

    fn run_level_chunk(&self, level: &str, source: &str) -> LuaResult<RegistryKey> {
        let api: Table = self.lua.registry_value(&self.api)?;
        let store = namespace::new_store(&self.lua, api)?;
        let env = namespace::setup_environment(&self.lua, &store)?;
        self.lua
            .load(source)
            .set_name(format!("@{level}"))
            .set_environment(env.clone())
            .exec()?;
        namespace::seal(&self.lua, &env, &store)?;
        self.lua.create_registry_value(store)
    }

    pub fn is_loaded(&self) -> bool {
        self.context.borrow().is_loaded()
    }

    pub fn loaded_level(&self) -> Option<String> {
        self.context.borrow().loaded_level.clone()
    }

    /// Triggers `target` the way the game does when a touch, relay or
    /// script fires it.
    pub fn use_entity(
        &self,
        target: EntityId,
        other: Option<EntityId>,
        activator: Option<EntityId>,
    ) {
        dispatch::use_entity(&self.lua, &self.context, target, other, activator);
    }

    /// Advances game time and fires delayed helpers that have come due.
    pub fn run_frame(&self, seconds: f32) {
        dispatch::run_frame(&self.lua, &self.context, seconds);
    }

    pub fn pool(&self) -> Ref<'_, EntityPool> {
        Ref::map(self.context.borrow(), |ctx| &ctx.pool)
    }

    pub fn pool_mut(&self) -> RefMut<'_, EntityPool> {
        RefMut::map(self.context.borrow_mut(), |ctx| &mut ctx.pool)
    }

    pub fn drain_events(&self) -> Vec<PoolEvent> {
        self.pool_mut().drain_events()
    }

    /// Interns `text` into the level's string pool.
    pub fn intern(&self, text: &str) -> Rc<str> {
        self.context.borrow_mut().strings.intern(text)
    }

    /// Spawns a map entity with its key/value pairs. Returns `None` when the
    /// classname has no spawn function and the entity was discarded.
    pub fn spawn_map_entity(&self, spec: &EntitySpec) -> Result<Option<EntityId>, ScriptError> {
        let mut guard = self.context.borrow_mut();
        let ctx = &mut *guard;
        let id = ctx.pool.spawn()?;
        let mut values = Vec::with_capacity(spec.keys.len() + 1);
        values.push((
            EntityField::Classname,
            FieldValue::String(Some(ctx.strings.intern(&spec.classname))),
        ));
        for (key, value) in &spec.keys {
            let converted = EntityField::parse(key)
                .ok_or_else(|| ScriptError::UnknownField(key.clone()))
                .and_then(|field| Ok((field, json_field_value(&mut ctx.strings, field, value)?)));
            match converted {
                Ok(pair) => values.push(pair),
                Err(err) => {
                    ctx.pool.free(id);
                    return Err(err);
                }
            }
        }
        if let Some(entity) = ctx.pool.entity_mut(id) {
            for (field, value) in values {
                entity.fields.set(field, value);
            }
        }
        Ok(ctx.pool.call_spawn(id).then_some(id))
    }

    pub fn variable(&self, kind: VariableKind, key: &str) -> Option<ScriptValue> {
        self.context.borrow().variables(kind).get(key).cloned()
    }

    pub fn set_variable(
        &self,
        kind: VariableKind,
        key: &str,
        value: Option<ScriptValue>,
    ) -> Result<(), ScriptError> {
        self.context.borrow_mut().variables_mut(kind).set(key, value)
    }

    pub fn snapshot(&self, kind: VariableKind) -> BTreeMap<String, String> {
        let ctx = self.context.borrow();
        save::snapshot(ctx.variables(kind), &ctx.pool)
    }

    pub fn restore(
        &self,
        kind: VariableKind,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), CodecError> {
        let mut guard = self.context.borrow_mut();
        let ctx = &mut *guard;
        let table = match kind {
            VariableKind::Ephemeral => &mut ctx.vars,
            VariableKind::Persistent => &mut ctx.persistent,
        };
        save::restore(table, variables, &ctx.pool)
    }

    pub fn save_variables(&self) -> SavedVariables {
        SavedVariables {
            vars: self.snapshot(VariableKind::Ephemeral),
            persistent: self.snapshot(VariableKind::Persistent),
        }
    }

    /// Replaces both variable tables with the saved ones. If any entry fails
    /// to decode, neither table changes.
    pub fn load_saved_game(&self, saved: &SavedVariables) -> Result<(), CodecError> {
        let mut guard = self.context.borrow_mut();
        let ctx = &mut *guard;
        let vars = save::decode_table(VariableKind::Ephemeral, &saved.vars, &ctx.pool)?;
        let persistent =
            save::decode_table(VariableKind::Persistent, &saved.persistent, &ctx.pool)?;
        ctx.vars = vars;
        ctx.persistent = persistent;
        Ok(())
    }

    pub fn reset_for_new_game(&self) {
        self.context.borrow_mut().reset_for_new_game();
    }
}

fn json_type_name(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
    .to_string()
}

fn json_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn json_vector(value: &JsonValue) -> Option<Vec3> {
    let parts: Vec<f32> = match value {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| json_number(item).map(|n| n as f32))
            .collect::<Option<_>>()?,
        JsonValue::String(text) => text
            .split_whitespace()
            .map(|part| part.parse().ok())
            .collect::<Option<_>>()?,
        _ => return None,
    };
    match parts.as_slice() {
        [x, y, z] => Some(Vec3::new(*x, *y, *z)),
        _ => None,
    }
}

fn json_field_value(
    strings: &mut StringPool,
    field: EntityField,
    value: &JsonValue,
) -> Result<FieldValue, ScriptError> {
    let mismatch = |expected| ScriptError::FieldType {
        field: field.name(),
        expected,
        found: json_type_name(value),
    };
    Ok(match field.kind() {
        FieldKind::String => match value {
            JsonValue::Null => FieldValue::String(None),
            JsonValue::String(text) => FieldValue::String(Some(strings.intern(text))),
            JsonValue::Number(number) => {
                FieldValue::String(Some(strings.intern(&number.to_string())))
            }
            _ => return Err(mismatch("string")),
        },
        FieldKind::Float => {
            FieldValue::Float(json_number(value).ok_or_else(|| mismatch("number"))? as f32)
        }
        FieldKind::Integer => {
            let number = json_number(value).ok_or_else(|| mismatch("integer"))?;
            if number.fract() != 0.0 || number.abs() > i32::MAX as f64 {
                return Err(mismatch("integer"));
            }
            FieldValue::Integer(number as i32)
        }
        FieldKind::Vector => {
            FieldValue::Vector(json_vector(value).ok_or_else(|| mismatch("vector"))?)
        }
    })
}
