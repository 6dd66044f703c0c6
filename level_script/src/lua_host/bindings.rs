use std::cell::Cell;

use glam::Vec3;
use log::{debug, info};
use mlua::{
    Function, Lua, MetaMethod, Result as LuaResult, Table, UserData, UserDataMethods, Value,
    Variadic,
};
use rand::Rng;

use super::context::{shared_context, ScriptValue, SharedContext, VariableKind};
use super::save::number_text;
use super::vector::{format_vector, to_vector, ScriptVector};
use crate::error::ScriptError;
use crate::handle::EntityHandle;
use crate::pool::{EntityField, FieldKind};

/// Scripts see this as `script.vars` or `script.persistent`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VariableProxy {
    kind: VariableKind,
}

impl VariableProxy {
    pub(crate) fn new(kind: VariableKind) -> Self {
        VariableProxy { kind }
    }
}

impl UserData for VariableProxy {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| {
            variable_index(lua, this.kind, key)
        });
        methods.add_meta_method(MetaMethod::NewIndex, |lua, this, (key, value): (Value, Value)| {
            variable_new_index(lua, this.kind, key, value)
        });
        methods.add_meta_method(MetaMethod::Pairs, |lua, this, ()| {
            variable_pairs(lua, this.kind)
        });
    }
}

fn variable_index<'lua>(
    lua: &'lua Lua,
    kind: VariableKind,
    key: Value<'lua>,
) -> LuaResult<Value<'lua>> {
    let Value::String(key) = key else {
        return Ok(Value::Nil);
    };
    let context = shared_context(lua)?;
    let stored = context
        .borrow()
        .variables(kind)
        .get(&key.to_string_lossy())
        .cloned();
    match stored {
        Some(value) => script_value_to_lua(lua, &value),
        None => Ok(Value::Nil),
    }
}

fn variable_new_index(lua: &Lua, kind: VariableKind, key: Value, value: Value) -> LuaResult<()> {
    let Value::String(key) = key else {
        return Err(ScriptError::VariableKey(kind.label()).into());
    };
    let value = script_value_from_lua(&value, kind)?;
    let context = shared_context(lua)?;
    let mut ctx = context.borrow_mut();
    ctx.variables_mut(kind).set(&key.to_string_lossy(), value)?;
    Ok(())
}

/// Iterates a snapshot so scripts may assign while looping.
fn variable_pairs<'lua>(
    lua: &'lua Lua,
    kind: VariableKind,
) -> LuaResult<(Function<'lua>, Table<'lua>, Value<'lua>)> {
    let context = shared_context(lua)?;
    let entries: Vec<(String, ScriptValue)> = context
        .borrow()
        .variables(kind)
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    let snapshot = lua.create_table_with_capacity(0, entries.len())?;
    for (key, value) in &entries {
        snapshot.raw_set(key.as_str(), script_value_to_lua(lua, value)?)?;
    }
    let next: Function = lua.globals().raw_get("next")?;
    Ok((next, snapshot, Value::Nil))
}

/// Converts a Lua value for storage in a variable table of `kind`. Nil maps
/// to `None`, which deletes the key.
pub(crate) fn script_value_from_lua(
    value: &Value,
    kind: VariableKind,
) -> Result<Option<ScriptValue>, ScriptError> {
    let converted = match value {
        Value::Nil => return Ok(None),
        Value::Boolean(flag) => ScriptValue::Boolean(*flag),
        Value::Integer(number) => ScriptValue::Integer(*number),
        Value::Number(number) => ScriptValue::Number(*number),
        Value::String(text) => ScriptValue::String(text.to_string_lossy().into_owned()),
        Value::UserData(data) => {
            if let Ok(handle) = data.borrow::<EntityHandle>() {
                ScriptValue::Entity(*handle)
            } else if let Ok(vector) = data.borrow::<ScriptVector>() {
                ScriptValue::Vector(vector.0)
            } else {
                return Err(kind.type_error());
            }
        }
        _ => return Err(kind.type_error()),
    };
    if kind.allows(&converted) {
        Ok(Some(converted))
    } else {
        Err(kind.type_error())
    }
}

pub(crate) fn script_value_to_lua<'lua>(
    lua: &'lua Lua,
    value: &ScriptValue,
) -> LuaResult<Value<'lua>> {
    Ok(match value {
        ScriptValue::Integer(number) => Value::Integer(*number),
        ScriptValue::Number(number) => Value::Number(*number),
        ScriptValue::Boolean(flag) => Value::Boolean(*flag),
        ScriptValue::String(text) => Value::String(lua.create_string(text)?),
        ScriptValue::Entity(handle) => Value::UserData(lua.create_userdata(*handle)?),
        ScriptValue::Vector(vector) => Value::UserData(lua.create_userdata(ScriptVector(*vector))?),
    })
}

/// Renders a value the way `print` shows it.
pub(crate) fn describe_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(flag) => flag.to_string(),
        Value::Integer(number) => number.to_string(),
        Value::Number(number) => number_text(*number),
        Value::String(text) => text.to_string_lossy().into_owned(),
        Value::UserData(data) => {
            if let Ok(handle) = data.borrow::<EntityHandle>() {
                handle.to_string()
            } else if let Ok(vector) = data.borrow::<ScriptVector>() {
                format_vector(vector.0)
            } else {
                "userdata".to_string()
            }
        }
        other => other.type_name().to_string(),
    }
}

pub(crate) fn install_print(lua: &Lua, store: &Table) -> LuaResult<()> {
    store.raw_set(
        "print",
        lua.create_function(|_, args: Variadic<Value>| {
            let line = args.iter().map(describe_value).collect::<Vec<_>>().join("\t");
            info!(target: "script", "{line}");
            Ok(())
        })?,
    )
}

/// Fills `api` with the `script.*` functions and variable containers.
pub(crate) fn install_api(lua: &Lua, context: SharedContext, api: &Table) -> LuaResult<()> {
    api.raw_set(
        "vector",
        lua.create_function(|_, (x, y, z): (Option<f32>, Option<f32>, Option<f32>)| {
            Ok(ScriptVector(Vec3::new(
                x.unwrap_or(0.0),
                y.unwrap_or(0.0),
                z.unwrap_or(0.0),
            )))
        })?,
    )?;

    let spawn_context = context.clone();
    api.raw_set(
        "spawn",
        lua.create_function(
            move |_, (classname, origin, angles): (String, Value, Option<Value>)| {
                spawn_entity(&spawn_context, &classname, &origin, angles.as_ref())
            },
        )?,
    )?;

    let find_context = context.clone();
    api.raw_set(
        "find",
        lua.create_function(move |lua, (value, key): (String, Option<String>)| {
            find_entities(lua, &find_context, &value, key.as_deref())
        })?,
    )?;

    api.raw_set(
        "foreach",
        lua.create_function(|_, (list, callback): (Table, Function)| {
            for index in 1..=list.raw_len() {
                let item: Value = list.raw_get(index)?;
                callback.call::<_, ()>(item)?;
            }
            Ok(())
        })?,
    )?;

    api.raw_set(
        "filter",
        lua.create_function(|lua, (list, predicate): (Table, Function)| {
            let kept = lua.create_table()?;
            let mut count = 0usize;
            for index in 1..=list.raw_len() {
                let item: Value = list.raw_get(index)?;
                let keep: Value = predicate.call(item.clone())?;
                if !matches!(keep, Value::Nil | Value::Boolean(false)) {
                    count += 1;
                    kept.raw_set(count, item)?;
                }
            }
            Ok((kept, count))
        })?,
    )?;

    let pick_context = context.clone();
    api.raw_set(
        "pick",
        lua.create_function(move |_, list: Table| {
            let len = list.raw_len();
            if len == 0 {
                return Ok(Value::Nil);
            }
            let index = pick_context.borrow_mut().rng.gen_range(1..=len);
            list.raw_get::<_, Value>(index)
        })?,
    )?;

    api.raw_set(
        "values",
        lua.create_function(|lua, list: Table| values_iterator(lua, list))?,
    )?;

    let frame_context = context;
    api.raw_set(
        "context",
        lua.create_function(move |_, ()| {
            let frame = frame_context.borrow().triggers.current();
            Ok((
                frame.map(|frame| frame.self_entity),
                frame.and_then(|frame| frame.activator),
            ))
        })?,
    )?;

    api.raw_set("vars", VariableProxy::new(VariableKind::Ephemeral))?;
    api.raw_set("persistent", VariableProxy::new(VariableKind::Persistent))?;
    Ok(())
}

fn spawn_entity(
    context: &SharedContext,
    classname: &str,
    origin: &Value,
    angles: Option<&Value>,
) -> LuaResult<EntityHandle> {
    let origin = to_vector(origin)?;
    let angles = match angles {
        Some(angles) => to_vector(angles)?,
        None => Vec3::ZERO,
    };
    let mut ctx = context.borrow_mut();
    let classname = ctx.strings.intern(classname);
    let id = ctx.pool.spawn().map_err(ScriptError::from)?;
    if let Some(entity) = ctx.pool.entity_mut(id) {
        entity.fields.classname = Some(classname);
        entity.fields.origin = origin;
        entity.fields.angles = angles;
    }
    if ctx.pool.call_spawn(id) {
        if let Some(entity) = ctx.pool.entity_mut(id) {
            // Script-spawned monsters stay out of the kill total.
            entity.counted = false;
        }
    } else {
        debug!("script spawn of entity {id} was rejected");
    }
    Ok(ctx.wrap(id))
}

fn find_entities<'lua>(
    lua: &'lua Lua,
    context: &SharedContext,
    value: &str,
    key: Option<&str>,
) -> LuaResult<Table<'lua>> {
    let key = key.unwrap_or("targetname");
    let field = EntityField::parse(key).ok_or_else(|| ScriptError::UnknownField(key.to_string()))?;
    if field.kind() != FieldKind::String {
        return Err(ScriptError::NotSearchable.into());
    }
    let handles: Vec<EntityHandle> = {
        let ctx = context.borrow();
        ctx.pool
            .find_by_field(field, value)
            .into_iter()
            .map(|id| ctx.wrap(id))
            .collect()
    };
    let results = lua.create_table_with_capacity(handles.len(), 0)?;
    for (index, handle) in handles.into_iter().enumerate() {
        results.raw_set(index + 1, handle)?;
    }
    Ok(results)
}

fn values_iterator<'lua>(lua: &'lua Lua, list: Table<'lua>) -> LuaResult<Function<'lua>> {
    let key = lua.create_registry_value(list)?;
    let position = Cell::new(0usize);
    lua.create_function(move |lua, ()| {
        let next = position.get() + 1;
        position.set(next);
        let list: Table = lua.registry_value(&key)?;
        list.raw_get::<_, Value>(next)
    })
}
