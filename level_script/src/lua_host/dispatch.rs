//! Use callbacks and the delayed helpers that fire them later.
//!
//! Nothing here holds a context borrow while Lua runs: every callback can
//! re-enter the engine and borrow it again.

use log::{debug, info, warn};
use mlua::{Function, Lua, Table, Value};

use super::context::{SharedContext, TriggerFrame};
use crate::error::ScriptError;
use crate::handle::EntityHandle;
use crate::pool::{EntityField, EntityId, Think, UseBehavior, UseEvent, TALK_SOUND};

const DELAYED_TRIGGER: &str = "DelayedTrigger";
const DELAYED_KILL: &str = "DelayedKill";
const DELAYED_MESSAGE: &str = "DelayedMessage";

/// Runs `target`'s use behavior. Freed entities and entities without one are
/// ignored.
pub(crate) fn use_entity(
    lua: &Lua,
    context: &SharedContext,
    target: EntityId,
    other: Option<EntityId>,
    activator: Option<EntityId>,
) {
    let behavior = {
        let ctx = context.borrow();
        ctx.pool
            .entity(target)
            .filter(|entity| entity.in_use())
            .and_then(|entity| entity.use_behavior.clone())
    };
    match behavior {
        None => debug!("entity {target} has no use behavior"),
        Some(UseBehavior::Script) => script_use(lua, context, target, other, activator),
        Some(UseBehavior::Relay) => relay_use(lua, context, target, activator),
        Some(UseBehavior::Native(callback)) => {
            let mut ctx = context.borrow_mut();
            callback(
                &mut ctx.pool,
                UseEvent {
                    target,
                    other,
                    activator,
                },
            );
        }
    }
}

fn relay_use(lua: &Lua, context: &SharedContext, relay: EntityId, activator: Option<EntityId>) {
    let targets = {
        let ctx = context.borrow();
        let Some(name) = ctx.pool.entity(relay).and_then(|entity| entity.fields.target.clone())
        else {
            return;
        };
        ctx.pool
            .find_by_field(EntityField::Targetname, &name)
            .into_iter()
            .map(|id| ctx.wrap(id))
            .collect::<Vec<_>>()
    };
    for target in targets {
        // An earlier target may have removed this one.
        let live = target.resolve(&context.borrow().pool);
        if let Some(id) = live {
            use_entity(lua, context, id, Some(relay), activator);
        }
    }
}

/// Calls the level function named by the entity's `script_function`.
/// Failures are logged and never reach the caller.
pub(crate) fn script_use(
    lua: &Lua,
    context: &SharedContext,
    entity: EntityId,
    other: Option<EntityId>,
    activator: Option<EntityId>,
) {
    let lookup = {
        let ctx = context.borrow();
        let Some(target) = ctx.pool.entity(entity) else {
            return;
        };
        let label = target.to_string();
        let function_name = target.fields.script_function.clone();
        let found = match (&ctx.globals, function_name) {
            (None, _) => {
                warn!("{label} triggered but script not loaded");
                return;
            }
            (Some(_), None) => {
                warn!("{label} has no function set");
                return;
            }
            (Some(key), Some(name)) => {
                let store = lua.registry_value::<Table>(key);
                store.map(|store| (label, name, store))
            }
        };
        found
    };
    let (label, name, store) = match lookup {
        Ok(found) => found,
        Err(err) => {
            warn!("script globals unavailable: {err}");
            return;
        }
    };

    let function = match store.raw_get::<_, Value>(&*name) {
        Ok(Value::Function(function)) => function,
        Ok(Value::Nil) => {
            warn!("{label} tried to call nonexistent function {name}");
            return;
        }
        Ok(other) => {
            warn!(
                "{label} tried to call non-function object {name} ({})",
                other.type_name()
            );
            return;
        }
        Err(err) => {
            warn!("{label} failed to look up function {name}: {err}");
            return;
        }
    };

    let (self_handle, other_handle, activator_handle) = {
        let ctx = context.borrow();
        (
            ctx.wrap(entity),
            other.map(|id| ctx.wrap(id)),
            activator.map(|id| ctx.wrap(id)),
        )
    };
    let depth = context.borrow_mut().triggers.push(TriggerFrame {
        self_entity: self_handle,
        activator: activator_handle,
    });
    if let Err(err) = call_script(&function, self_handle, other_handle, activator_handle) {
        warn!("{label} error calling function {name}: {err}");
    }
    context.borrow_mut().triggers.pop(depth);
}

fn call_script(
    function: &Function,
    self_handle: EntityHandle,
    other: Option<EntityHandle>,
    activator: Option<EntityHandle>,
) -> mlua::Result<()> {
    function.call::<_, ()>((self_handle, other, activator))
}

/// Spawns a helper entity that performs `think` after `delay` seconds.
pub(crate) fn schedule(
    context: &SharedContext,
    target: EntityHandle,
    delay: f32,
    think: Think,
) -> Result<EntityId, ScriptError> {
    let mut ctx = context.borrow_mut();
    let script_arg = target.get(&ctx.pool)?.fields.script_arg.clone();
    let classname = ctx.strings.intern(match think {
        Think::DelayedTrigger { .. } => DELAYED_TRIGGER,
        Think::DelayedKill { .. } => DELAYED_KILL,
        Think::DelayedMessage { .. } => DELAYED_MESSAGE,
    });
    let helper = ctx.pool.spawn()?;
    if let Some(entity) = ctx.pool.entity_mut(helper) {
        entity.fields.classname = Some(classname);
        if let Think::DelayedTrigger { .. } = think {
            entity.fields.script_arg = script_arg;
        }
    }
    ctx.pool.schedule_think(helper, delay, think);
    Ok(helper)
}

/// Schedules a center print of `text` on `target`.
pub(crate) fn schedule_message(
    context: &SharedContext,
    target: EntityHandle,
    delay: f32,
    text: &str,
) -> Result<EntityId, ScriptError> {
    let helper = schedule(context, target, delay, Think::DelayedMessage { target })?;
    let mut ctx = context.borrow_mut();
    let text = ctx.strings.intern(text);
    if let Some(entity) = ctx.pool.entity_mut(helper) {
        entity.fields.message = Some(text);
    }
    Ok(helper)
}

/// Advances the clock and fires every helper that has come due.
pub(crate) fn run_frame(lua: &Lua, context: &SharedContext, seconds: f32) {
    context.borrow_mut().pool.advance(seconds);
    loop {
        let due = context.borrow_mut().pool.take_due_think();
        let Some((helper, think)) = due else {
            break;
        };
        let stamp = context.borrow().wrap(helper);
        fire(lua, context, helper, think);
        // The callback may have freed the helper and handed its slot to a
        // new entity.
        let mut ctx = context.borrow_mut();
        if let Some(helper) = stamp.resolve(&ctx.pool) {
            ctx.pool.free(helper);
        }
    }
}

fn fire(lua: &Lua, context: &SharedContext, helper: EntityId, think: Think) {
    match think {
        Think::DelayedTrigger { target, activator } => {
            let (target_id, activator_id, triggerable) = {
                let ctx = context.borrow();
                let target_id = target.resolve(&ctx.pool);
                let triggerable = target_id
                    .and_then(|id| ctx.pool.entity(id))
                    .is_some_and(|entity| entity.use_behavior.is_some());
                (
                    target_id,
                    activator.and_then(|handle| handle.resolve(&ctx.pool)),
                    triggerable,
                )
            };
            match target_id {
                None => info!("script delayed trigger target no longer exists"),
                Some(_) if !triggerable => {
                    info!("script delayed trigger target no longer has a trigger function")
                }
                Some(id) => use_entity(lua, context, id, Some(helper), activator_id),
            }
        }
        Think::DelayedKill { target } => {
            let mut ctx = context.borrow_mut();
            match target.resolve(&ctx.pool) {
                None => info!("script delayed kill target no longer exists"),
                Some(id) => ctx.pool.kill(id),
            }
        }
        Think::DelayedMessage { target } => {
            let mut ctx = context.borrow_mut();
            let text = ctx
                .pool
                .entity(helper)
                .and_then(|entity| entity.fields.message.clone());
            match (target.resolve(&ctx.pool), text) {
                (None, _) => info!("script delayed message target no longer exists"),
                (Some(id), Some(text)) => {
                    ctx.pool.center_print(id, &text);
                    ctx.pool.sound(id, TALK_SOUND);
                }
                (Some(_), None) => {}
            }
        }
    }
}
