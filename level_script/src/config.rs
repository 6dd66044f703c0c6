//! Where level scripts live and how large the entity pool is.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Player slots reserved right after the world.
    pub max_clients: usize,
    pub max_entities: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_clients: 1,
            max_entities: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub game_dir: PathBuf,
    pub script_dir: String,
    pub extension: String,
    pub pool: PoolConfig,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        ScriptConfig {
            game_dir: PathBuf::from("baseq2"),
            script_dir: "scripts".to_string(),
            extension: "lua".to_string(),
            pool: PoolConfig::default(),
        }
    }
}

impl ScriptConfig {
    pub fn new(game_dir: impl Into<PathBuf>) -> Self {
        ScriptConfig {
            game_dir: game_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading script config {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing script config {}", path.display()))
    }

    /// `<game_dir>/<script_dir>/<level>.<extension>`
    pub fn script_path(&self, level: &str) -> PathBuf {
        self.game_dir
            .join(&self.script_dir)
            .join(format!("{level}.{}", self.extension))
    }
}
