#![allow(dead_code)]

use std::fs;

use anyhow::{anyhow, Context, Result};
use level_script::pool::{EntityId, EntitySpec};
use level_script::{EntityHandle, ScriptConfig, ScriptEngine, ScriptValue, VariableKind};
use tempfile::TempDir;

pub const LEVEL: &str = "testlevel";

/// A game directory holding one level script, plus an engine pointed at it.
pub struct Harness {
    pub dir: TempDir,
    pub engine: ScriptEngine,
    pub player: EntityId,
}

impl Harness {
    pub fn new(source: &str) -> Result<Self> {
        let dir = tempfile::tempdir().context("creating game dir")?;
        let scripts = dir.path().join("scripts");
        fs::create_dir_all(&scripts)?;
        fs::write(scripts.join(format!("{LEVEL}.lua")), source)?;
        let engine = ScriptEngine::new(ScriptConfig::new(dir.path()))
            .map_err(|err| anyhow!("creating engine: {err}"))?;
        let player = engine
            .pool_mut()
            .connect_player(0)
            .ok_or_else(|| anyhow!("no player slot"))?;
        Ok(Harness {
            dir,
            engine,
            player,
        })
    }

    pub fn loaded(source: &str) -> Result<Self> {
        let harness = Self::new(source)?;
        harness.engine.load_level(LEVEL)?;
        Ok(harness)
    }

    pub fn spawn(&self, json: &str) -> Result<EntityId> {
        let spec: EntitySpec = serde_json::from_str(json)?;
        self.engine
            .spawn_map_entity(&spec)?
            .ok_or_else(|| anyhow!("{} was discarded", spec.classname))
    }

    /// Spawns a script entity named `targetname` that calls `function`.
    pub fn script_entity(&self, targetname: &str, function: &str) -> Result<EntityId> {
        self.spawn(&format!(
            r#"{{"classname": "script", "targetname": "{targetname}", "script_function": "{function}"}}"#
        ))
    }

    pub fn fire(&self, target: EntityId) {
        self.engine
            .use_entity(target, Some(self.player), Some(self.player));
    }

    pub fn var(&self, key: &str) -> Option<ScriptValue> {
        self.engine.variable(VariableKind::Ephemeral, key)
    }

    pub fn handle(&self, id: EntityId) -> EntityHandle {
        EntityHandle::wrap(&self.engine.pool(), id)
    }

    pub fn var_entity(&self, key: &str) -> Option<EntityHandle> {
        match self.var(key) {
            Some(ScriptValue::Entity(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn var_string(&self, key: &str) -> Option<String> {
        match self.var(key) {
            Some(ScriptValue::String(text)) => Some(text),
            _ => None,
        }
    }
}
