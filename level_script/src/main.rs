use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};

use level_script::pool::{EntityField, EntitySpec};
use level_script::{SavedVariables, ScriptConfig, ScriptEngine};

mod cli;

use cli::RunArgs;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cli::parse()?;
    run(args)
}

fn load_config(args: &RunArgs) -> Result<ScriptConfig> {
    match args.config.as_deref() {
        Some(path) => ScriptConfig::from_json_file(path),
        None => Ok(ScriptConfig::new(&args.game_dir)),
    }
}

fn read_entities(path: &Path) -> Result<Vec<EntitySpec>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading entity list {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing entity list {}", path.display()))
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let engine = ScriptEngine::new(config).context("creating Lua state")?;

    engine
        .load_level(&args.level)
        .with_context(|| format!("loading script for {}", args.level))?;

    let player = engine
        .pool_mut()
        .connect_player(0)
        .ok_or_else(|| anyhow!("configuration leaves no player slot"))?;

    if let Some(path) = args.entities.as_deref() {
        for spec in read_entities(path)? {
            match engine.spawn_map_entity(&spec) {
                Ok(Some(_)) => {}
                Ok(None) => warn!("{} has no spawn function; skipped", spec.classname),
                Err(err) => warn!("{}: {err}", spec.classname),
            }
        }
    }

    if let Some(path) = args.restore_json.as_deref() {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading saved variables {}", path.display()))?;
        let saved: SavedVariables = serde_json::from_str(&data)
            .with_context(|| format!("parsing saved variables {}", path.display()))?;
        engine
            .load_saved_game(&saved)
            .context("restoring saved variables")?;
    }

    for name in &args.fire {
        let targets = engine.pool().find_by_field(EntityField::Targetname, name);
        if targets.is_empty() {
            warn!("no entity named {name} to fire");
        }
        for target in targets {
            engine.use_entity(target, Some(player), Some(player));
        }
    }

    for _ in 0..args.frames {
        engine.run_frame(args.frame_time);
    }

    for event in engine.drain_events() {
        println!("{}", serde_json::to_string(&event).context("serializing event")?);
    }
    info!(
        "finished at t={:.2}s with {} monsters killed",
        engine.pool().time(),
        engine.pool().monsters_killed()
    );

    if let Some(path) = args.save_json.as_ref() {
        let json = serde_json::to_string_pretty(&engine.save_variables())
            .context("serializing saved variables")?;
        fs::write(path, json)
            .with_context(|| format!("writing saved variables to {}", path.display()))?;
        println!("Saved script variables to {}", path.display());
    }
    Ok(())
}
