use std::cell::RefCell;
use std::rc::Rc;

mod trigger_stack;
mod variables;

pub use trigger_stack::{TriggerFrame, TriggerStack};
pub use variables::{ScriptValue, VariableKind, VariableTable};

use mlua::{Lua, RegistryKey, Result as LuaResult};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::ScriptConfig;
use crate::handle::EntityHandle;
use crate::pool::{EntityId, EntityPool};
use crate::string_pool::StringPool;

pub(crate) type SharedContext = Rc<RefCell<ScriptContext>>;

/// Engine-lifetime state shared by every binding. Level-scoped parts are
/// reset by [`ScriptContext::reset_for_level`]; persistent variables only by
/// [`ScriptContext::reset_for_new_game`].
#[derive(Debug)]
pub struct ScriptContext {
    pub(super) config: ScriptConfig,
    pub(super) pool: EntityPool,
    pub(super) strings: StringPool,
    pub(super) vars: VariableTable,
    pub(super) persistent: VariableTable,
    pub(super) triggers: TriggerStack,
    pub(super) loaded_level: Option<String>,
    /// Frozen store behind the level's global namespace, set once a load
    /// succeeds.
    pub(super) globals: Option<RegistryKey>,
    pub(super) rng: StdRng,
}

impl ScriptContext {
    pub fn new(config: ScriptConfig) -> Self {
        let pool = EntityPool::new(&config.pool);
        ScriptContext {
            config,
            pool,
            strings: StringPool::new(),
            vars: VariableTable::new(VariableKind::Ephemeral),
            persistent: VariableTable::new(VariableKind::Persistent),
            triggers: TriggerStack::default(),
            loaded_level: None,
            globals: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub(super) fn reset_for_level(&mut self) {
        self.strings.reset();
        self.vars.clear();
        self.triggers.clear();
        self.loaded_level = None;
        self.globals = None;
    }

    pub(super) fn reset_for_new_game(&mut self) {
        self.persistent.clear();
    }

    pub(super) fn variables(&self, kind: VariableKind) -> &VariableTable {
        match kind {
            VariableKind::Ephemeral => &self.vars,
            VariableKind::Persistent => &self.persistent,
        }
    }

    pub(super) fn variables_mut(&mut self, kind: VariableKind) -> &mut VariableTable {
        match kind {
            VariableKind::Ephemeral => &mut self.vars,
            VariableKind::Persistent => &mut self.persistent,
        }
    }

    pub(super) fn wrap(&self, id: EntityId) -> EntityHandle {
        EntityHandle::wrap(&self.pool, id)
    }

    pub(super) fn is_loaded(&self) -> bool {
        self.loaded_level.is_some()
    }
}

/// Fetches the context stored in the Lua state's app data.
pub(crate) fn shared_context(lua: &Lua) -> LuaResult<SharedContext> {
    lua.app_data_ref::<SharedContext>()
        .map(|context| Rc::clone(&context))
        .ok_or_else(|| mlua::Error::RuntimeError("script context is not installed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::{ScriptContext, ScriptValue, TriggerFrame, VariableKind};
    use crate::config::ScriptConfig;
    use crate::pool::EntityId;

    fn make_context() -> ScriptContext {
        ScriptContext::new(ScriptConfig::default())
    }

    #[test]
    fn level_reset_keeps_persistent_variables() {
        let mut context = make_context();
        context
            .variables_mut(VariableKind::Ephemeral)
            .set("opened", Some(ScriptValue::Boolean(true)))
            .expect("set ephemeral");
        context
            .variables_mut(VariableKind::Persistent)
            .set("visits", Some(ScriptValue::Integer(3)))
            .expect("set persistent");
        let self_entity = context.wrap(EntityId::WORLD);
        context.triggers.push(TriggerFrame {
            self_entity,
            activator: None,
        });
        context.loaded_level = Some("base1".to_string());
        context.strings.intern("door");

        context.reset_for_level();

        assert!(context.vars.is_empty());
        assert!(context.strings.is_empty());
        assert_eq!(context.triggers.depth(), 0);
        assert!(!context.is_loaded());
        assert_eq!(
            context.persistent.get("visits"),
            Some(&ScriptValue::Integer(3))
        );

        context.reset_for_new_game();
        assert!(context.persistent.is_empty());
    }
}
