//! Methods scripts can call on entity handles.
//!
//! Every method re-validates the handle before touching the pool, since a
//! handle held in a script variable may have gone stale since it was made.

use mlua::{AnyUserData, Lua, MetaMethod, Result as LuaResult, UserData, UserDataMethods, Value};

use super::context::shared_context;
use super::dispatch;
use super::save::number_text;
use super::vector::{to_vector, ScriptVector};
use crate::error::ScriptError;
use crate::handle::EntityHandle;
use crate::pool::{Entity, EntityField, FieldKind, FieldValue, Think, TALK_SOUND};

impl UserData for EntityHandle {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("get", |lua, this, key: String| entity_get(lua, *this, &key));
        methods.add_method("set", |lua, this, (key, value): (String, Value)| {
            entity_set(lua, *this, &key, value)
        });
        methods.add_method("trigger", |lua, this, delay: Option<f32>| {
            entity_trigger(lua, *this, delay.unwrap_or(0.0))
        });
        methods.add_method("kill", |lua, this, delay: Option<f32>| {
            entity_kill(lua, *this, delay.unwrap_or(0.0))
        });
        methods.add_method("message", |lua, this, (text, delay): (String, Option<f32>)| {
            entity_message(lua, *this, &text, delay.unwrap_or(0.0))
        });
        methods.add_method("give", |lua, this, item: String| entity_give(lua, *this, &item));
        methods.add_method("player", |lua, this, ()| {
            entity_flag(lua, *this, |entity| entity.is_player())
        });
        methods.add_method("monster", |lua, this, ()| {
            entity_flag(lua, *this, |entity| entity.is_monster())
        });
        methods.add_method("damageable", |lua, this, ()| {
            entity_flag(lua, *this, |entity| entity.take_damage)
        });
        methods.add_method("valid", |lua, this, ()| {
            let context = shared_context(lua)?;
            let valid = this.is_valid(&context.borrow().pool);
            Ok(valid)
        });

        methods.add_meta_method(MetaMethod::Eq, |_, this, other: AnyUserData| {
            Ok(other
                .borrow::<EntityHandle>()
                .is_ok_and(|other| *other == *this))
        });
        methods.add_meta_method(MetaMethod::ToString, |lua, this, ()| {
            let context = shared_context(lua)?;
            let ctx = context.borrow();
            let text = match this.resolve(&ctx.pool).and_then(|id| ctx.pool.entity(id)) {
                Some(entity) => entity.to_string(),
                None => format!("stale {this}"),
            };
            Ok(text)
        });
        methods.add_meta_method(MetaMethod::NewIndex, |_, _, _: (Value, Value)| {
            Err::<(), _>(ScriptError::ReadOnly.into())
        });
    }
}

fn parse_field(key: &str) -> Result<EntityField, ScriptError> {
    EntityField::parse(key).ok_or_else(|| ScriptError::UnknownField(key.to_string()))
}

fn entity_get<'lua>(lua: &'lua Lua, handle: EntityHandle, key: &str) -> LuaResult<Value<'lua>> {
    let field = parse_field(key)?;
    let context = shared_context(lua)?;
    let value = handle.get(&context.borrow().pool)?.fields.get(field);
    Ok(match value {
        FieldValue::String(None) => Value::Nil,
        FieldValue::String(Some(text)) => Value::String(lua.create_string(&*text)?),
        FieldValue::Float(number) => Value::Number(number as f64),
        FieldValue::Integer(number) => Value::Integer(number as i64),
        FieldValue::Vector(vector) => Value::UserData(lua.create_userdata(ScriptVector(vector))?),
    })
}

fn field_type_error(field: EntityField, expected: &'static str, found: &Value) -> ScriptError {
    ScriptError::FieldType {
        field: field.name(),
        expected,
        found: found.type_name().to_string(),
    }
}

fn entity_set(lua: &Lua, handle: EntityHandle, key: &str, value: Value) -> LuaResult<()> {
    let field = parse_field(key)?;
    if !field.is_writable() {
        return Err(ScriptError::ReadOnly.into());
    }
    let context = shared_context(lua)?;
    let mut ctx = context.borrow_mut();
    handle.check(&ctx.pool)?;
    let converted = match field.kind() {
        FieldKind::String => {
            let text = match &value {
                Value::Nil => None,
                Value::String(text) => Some(text.to_string_lossy().into_owned()),
                Value::Integer(number) => Some(number.to_string()),
                Value::Number(number) => Some(number_text(*number)),
                other => return Err(field_type_error(field, "string", other).into()),
            };
            FieldValue::String(text.map(|text| ctx.strings.intern(&text)))
        }
        FieldKind::Float => match &value {
            Value::Integer(number) => FieldValue::Float(*number as f32),
            Value::Number(number) => FieldValue::Float(*number as f32),
            other => return Err(field_type_error(field, "number", other).into()),
        },
        FieldKind::Integer => match &value {
            Value::Integer(number) => FieldValue::Integer(
                i32::try_from(*number).map_err(|_| field_type_error(field, "integer", &value))?,
            ),
            Value::Number(number) if number.fract() == 0.0 && number.abs() <= i32::MAX as f64 => {
                FieldValue::Integer(*number as i32)
            }
            other => return Err(field_type_error(field, "integer", other).into()),
        },
        FieldKind::Vector => FieldValue::Vector(to_vector(&value)?),
    };
    let entity = handle.get_mut(&mut ctx.pool)?;
    entity.fields.set(field, converted);
    Ok(())
}

fn entity_trigger(lua: &Lua, handle: EntityHandle, delay: f32) -> LuaResult<()> {
    let context = shared_context(lua)?;
    let (target, frame) = {
        let ctx = context.borrow();
        let entity = handle.get(&ctx.pool)?;
        if entity.use_behavior.is_none() {
            return Err(ScriptError::NotTriggerable(entity.classname().to_string()).into());
        }
        (entity.index(), ctx.triggers.current())
    };
    let activator = frame.and_then(|frame| frame.activator);

    if delay > 0.0 {
        dispatch::schedule(
            &context,
            handle,
            delay,
            Think::DelayedTrigger {
                target: handle,
                activator,
            },
        )?;
        return Ok(());
    }
    if frame.is_some_and(|frame| frame.self_entity == handle) {
        return Err(ScriptError::SelfTrigger.into());
    }
    // Either entity may have been freed since the frame was pushed.
    let (other, activator) = {
        let ctx = context.borrow();
        (
            frame.and_then(|frame| frame.self_entity.resolve(&ctx.pool)),
            activator.and_then(|handle| handle.resolve(&ctx.pool)),
        )
    };
    dispatch::use_entity(lua, &context, target, other, activator);
    Ok(())
}

fn entity_kill(lua: &Lua, handle: EntityHandle, delay: f32) -> LuaResult<()> {
    let context = shared_context(lua)?;
    let target = {
        let ctx = context.borrow();
        let entity = handle.get(&ctx.pool)?;
        if entity.is_player() {
            return Err(ScriptError::IsAPlayer.into());
        }
        entity.index()
    };
    if delay > 0.0 {
        dispatch::schedule(&context, handle, delay, Think::DelayedKill { target: handle })?;
    } else {
        context.borrow_mut().pool.kill(target);
    }
    Ok(())
}

fn entity_message(lua: &Lua, handle: EntityHandle, text: &str, delay: f32) -> LuaResult<()> {
    let context = shared_context(lua)?;
    let target = {
        let ctx = context.borrow();
        let entity = handle.get(&ctx.pool)?;
        if !entity.is_player() {
            return Err(ScriptError::NotAPlayer(entity.classname().to_string()).into());
        }
        entity.index()
    };
    if delay > 0.0 {
        dispatch::schedule_message(&context, handle, delay, text)?;
    } else {
        let mut ctx = context.borrow_mut();
        ctx.pool.center_print(target, text);
        ctx.pool.sound(target, TALK_SOUND);
    }
    Ok(())
}

fn entity_give(lua: &Lua, handle: EntityHandle, item: &str) -> LuaResult<bool> {
    let context = shared_context(lua)?;
    let mut ctx = context.borrow_mut();
    let (player, origin) = {
        let entity = handle.get(&ctx.pool)?;
        if !entity.is_player() {
            return Err(ScriptError::NotAPlayer(entity.classname().to_string()).into());
        }
        (entity.index(), entity.fields.origin)
    };
    let classname = match ctx.pool.items().find(item) {
        Some(def) => def.classname.clone(),
        None => return Err(ScriptError::UnknownItem(item.to_string()).into()),
    };
    let classname = ctx.strings.intern(&classname);
    let spawned = ctx.pool.spawn().map_err(ScriptError::from)?;
    if let Some(entity) = ctx.pool.entity_mut(spawned) {
        entity.fields.classname = Some(classname);
        entity.fields.origin = origin;
    }
    if !ctx.pool.call_spawn(spawned) {
        return Ok(false);
    }
    let accepted = ctx.pool.touch_item(spawned, player);
    if !accepted {
        ctx.pool.free(spawned);
    }
    Ok(accepted)
}

fn entity_flag(
    lua: &Lua,
    handle: EntityHandle,
    test: impl Fn(&Entity) -> bool,
) -> LuaResult<bool> {
    let context = shared_context(lua)?;
    let ctx = context.borrow();
    let entity = handle.get(&ctx.pool)?;
    Ok(test(entity))
}
