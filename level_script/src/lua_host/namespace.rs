//! The sandboxed global namespace a level script runs in.
//!
//! A chunk's environment is an empty proxy whose metatable points at a
//! private store. While the chunk runs, `__newindex` admits new
//! function/table globals (tables are frozen on the way in); once the load
//! succeeds it rejects every write.

use std::collections::HashMap;
use std::ffi::c_void;

use mlua::{Function, Lua, Result as LuaResult, Table, Value};

use crate::error::ScriptError;

const API_NAME: &str = "script";

const BASE_FUNCTIONS: [&str; 10] = [
    "assert", "error", "ipairs", "next", "pairs", "pcall", "select", "tonumber", "tostring",
    "type",
];

/// Metamethods shared by every frozen proxy made during one freeze.
struct FreezeKit<'lua> {
    new_index: Function<'lua>,
    len: Function<'lua>,
    pairs: Function<'lua>,
}

impl<'lua> FreezeKit<'lua> {
    fn new(lua: &'lua Lua) -> LuaResult<Self> {
        Ok(FreezeKit {
            new_index: readonly_function(lua)?,
            len: lua.create_function(|_, proxy: Table| Ok(frozen_source(&proxy)?.raw_len()))?,
            pairs: lua.create_function(|lua, proxy: Table| {
                let next: Function = lua.globals().raw_get("next")?;
                Ok((next, frozen_source(&proxy)?, Value::Nil))
            })?,
        })
    }
}

fn frozen_source<'lua>(proxy: &Table<'lua>) -> LuaResult<Table<'lua>> {
    match proxy.get_metatable() {
        Some(meta) => meta.raw_get("__index"),
        None => Err(ScriptError::Argument("table is not frozen".into()).into()),
    }
}

fn readonly_function(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, _: mlua::MultiValue| Err::<(), _>(ScriptError::ReadOnly.into()))
}

/// Returns a read-only view of `table`. Nested tables are frozen first and
/// swapped in place, so no writable reference stays reachable through the
/// result. Shared and cyclic references freeze to the same proxy.
pub(crate) fn freeze<'lua>(lua: &'lua Lua, table: Table<'lua>) -> LuaResult<Table<'lua>> {
    let kit = FreezeKit::new(lua)?;
    let mut seen = HashMap::new();
    freeze_with(lua, &kit, table, &mut seen)
}

fn freeze_with<'lua>(
    lua: &'lua Lua,
    kit: &FreezeKit<'lua>,
    table: Table<'lua>,
    seen: &mut HashMap<*const c_void, Table<'lua>>,
) -> LuaResult<Table<'lua>> {
    let identity = table.to_pointer();
    if let Some(proxy) = seen.get(&identity) {
        return Ok(proxy.clone());
    }
    let proxy = lua.create_table()?;
    seen.insert(identity, proxy.clone());

    let nested: Vec<(Value, Table)> = table
        .clone()
        .pairs::<Value, Value>()
        .filter_map(|entry| match entry {
            Ok((key, Value::Table(inner))) => Some(Ok((key, inner))),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
        .collect::<LuaResult<_>>()?;
    for (key, inner) in nested {
        let frozen = freeze_with(lua, kit, inner, seen)?;
        table.raw_set(key, frozen)?;
    }

    let meta = lua.create_table()?;
    meta.raw_set("__index", table)?;
    meta.raw_set("__newindex", kit.new_index.clone())?;
    meta.raw_set("__len", kit.len.clone())?;
    meta.raw_set("__pairs", kit.pairs.clone())?;
    meta.raw_set("__metatable", false)?;
    proxy.set_metatable(Some(meta));
    Ok(proxy)
}

/// Builds the frozen `script` API table from an unfrozen one, adding the
/// read-only standard library tables.
pub(crate) fn finish_api<'lua>(lua: &'lua Lua, api: Table<'lua>) -> LuaResult<Table<'lua>> {
    let globals = lua.globals();
    for library in ["math", "string", "table"] {
        let source: Table = globals.raw_get(library)?;
        let copy = lua.create_table()?;
        for entry in source.pairs::<Value, Value>() {
            let (key, value) = entry?;
            copy.raw_set(key, value)?;
        }
        api.raw_set(library, copy)?;
    }
    freeze(lua, api)
}

/// A fresh store holding the API table and the permitted base functions.
pub(crate) fn new_store<'lua>(lua: &'lua Lua, api: Table<'lua>) -> LuaResult<Table<'lua>> {
    let store = lua.create_table()?;
    let globals = lua.globals();
    for name in BASE_FUNCTIONS {
        let function: Function = globals.raw_get(name)?;
        store.raw_set(name, function)?;
    }
    super::bindings::install_print(lua, &store)?;
    store.raw_set(API_NAME, api)?;
    Ok(store)
}

/// The environment a level chunk runs in while it defines its globals.
pub(crate) fn setup_environment<'lua>(
    lua: &'lua Lua,
    store: &Table<'lua>,
) -> LuaResult<Table<'lua>> {
    let env = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.raw_set("__index", store.clone())?;
    let target = lua.create_registry_value(store.clone())?;
    meta.raw_set(
        "__newindex",
        lua.create_function(move |lua, (_, key, value): (Value, Value, Value)| {
            let store: Table = lua.registry_value(&target)?;
            define_global(lua, &store, key, value)
        })?,
    )?;
    meta.raw_set("__metatable", false)?;
    env.set_metatable(Some(meta));
    Ok(env)
}

fn define_global<'lua>(
    lua: &'lua Lua,
    store: &Table<'lua>,
    key: Value<'lua>,
    value: Value<'lua>,
) -> LuaResult<()> {
    let Value::String(name) = &key else {
        return Err(ScriptError::GlobalKey.into());
    };
    if name.as_bytes() == API_NAME.as_bytes() {
        return Err(ScriptError::ReservedGlobalName.into());
    }
    if !matches!(store.raw_get::<_, Value>(key.clone())?, Value::Nil) {
        return Err(ScriptError::GlobalRedefinition.into());
    }
    let value = match value {
        Value::Function(function) => Value::Function(function),
        Value::Table(table) => Value::Table(freeze(lua, table)?),
        _ => return Err(ScriptError::GlobalType.into()),
    };
    store.raw_set(key, value)
}

/// Switches a loaded environment to read-only.
pub(crate) fn seal(lua: &Lua, env: &Table, store: &Table) -> LuaResult<()> {
    let meta = lua.create_table()?;
    meta.raw_set("__index", store.clone())?;
    meta.raw_set("__newindex", readonly_function(lua)?)?;
    meta.raw_set("__metatable", false)?;
    env.set_metatable(Some(meta));
    Ok(())
}
