mod common;

use anyhow::Result;
use common::Harness;
use level_script::pool::PoolEvent;
use level_script::ScriptValue;

const PRIMITIVES_SCRIPT: &str = r#"
function arm(self)
    local victim = script.find("victim")[1]
    script.vars.victim = victim
    victim:kill(1)
end

function kill_now(self)
    local victim = script.find("victim")[1]
    victim:kill()
    script.vars.still_valid = victim:valid()
    script.vars.get_ok = pcall(function() return victim:get("targetname") end)
end

function reward(self, other, activator)
    script.vars.first = activator:give("key_blue_key")
    script.vars.second = activator:give("key_blue_key")
    script.vars.bad_item_ok = pcall(function() return activator:give("weapon_bfg9000") end)
    activator:message("hello")
    activator:message("later", 1)
    script.vars.message_self_ok = pcall(function() self:message("x") end)
    script.vars.kill_player_ok = pcall(function() activator:kill() end)
    script.vars.is_player = activator:player()
    script.vars.self_is_player = self:player()
end

function fields(self)
    self:set("target", "somewhere")
    self:set("message", 12)
    self:set("wait", 2)
    self:set("count", 4.0)
    script.vars.target = self:get("target")
    script.vars.message = self:get("message")
    script.vars.wait = self:get("wait")
    script.vars.count = self:get("count")
    script.vars.origin = self:get("origin")
    script.vars.readonly_ok = pcall(function() self:set("health", 5) end)
    script.vars.unknown_ok = pcall(function() self:get("nonsense") end)
    script.vars.bad_type_ok = pcall(function() self:set("count", "many") end)
    self:set("killtarget", nil)
    script.vars.killtarget = self:get("killtarget")
end

function search(self)
    local gates = script.find("GATE")
    script.vars.gates = #gates
    script.vars.by_class = #script.find("info_notnull", "classname")
    script.vars.numeric_ok = pcall(function() script.find("1", "health") end)
    local names = {}
    script.foreach(gates, function(gate) names[#names + 1] = gate:get("message") end)
    script.vars.first_message = names[1]
    local kept, count = script.filter(gates, function(gate) return gate:get("message") == "east" end)
    script.vars.kept = count
    script.vars.kept_first = kept[1]
    script.vars.picked = script.pick(gates)
    script.vars.pick_empty = script.pick({}) == nil
    local visited = 0
    for gate in script.values(gates) do
        visited = visited + 1
    end
    script.vars.visited = visited
end

function spawner(self)
    local made = script.spawn("info_notnull", script.vector(1, 2, 3), script.vector(0, 90, 0))
    script.vars.made = made
    script.vars.made_origin = made:get("origin")
    script.vars.bogus_valid = script.spawn("func_bogus", script.vector(0, 0, 0)):valid()
end
"#;

#[test]
fn delayed_kill_skips_a_reused_slot() -> Result<()> {
    let harness = Harness::loaded(PRIMITIVES_SCRIPT)?;
    let victim = harness.spawn(r#"{"classname": "info_notnull", "targetname": "victim"}"#)?;
    let armer = harness.script_entity("armer", "arm")?;
    harness.fire(armer);

    let old = harness.var_entity("victim").expect("victim stored");
    harness.engine.pool_mut().free(victim);
    let newcomer = harness.engine.pool_mut().spawn()?;
    assert_eq!(newcomer, victim);
    assert!(!old.is_valid(&harness.engine.pool()));

    harness.engine.run_frame(1.5);
    let pool = harness.engine.pool();
    assert!(pool.entity(newcomer).is_some_and(|e| e.in_use()));
    assert!(pool.iter().all(|e| e.think.is_none()));
    Ok(())
}

#[test]
fn delayed_kill_removes_a_live_target() -> Result<()> {
    let harness = Harness::loaded(PRIMITIVES_SCRIPT)?;
    let victim = harness.spawn(r#"{"classname": "monster_soldier", "targetname": "victim"}"#)?;
    let armer = harness.script_entity("armer", "arm")?;
    harness.fire(armer);
    assert!(harness.engine.pool().entity(victim).is_some_and(|e| e.in_use()));
    harness.engine.run_frame(1.0);
    assert!(!harness.engine.pool().entity(victim).is_some_and(|e| e.in_use()));
    assert_eq!(harness.engine.pool().monsters_killed(), 1);
    Ok(())
}

#[test]
fn immediate_kill_invalidates_the_handle() -> Result<()> {
    let harness = Harness::loaded(PRIMITIVES_SCRIPT)?;
    harness.spawn(r#"{"classname": "info_notnull", "targetname": "victim"}"#)?;
    let killer = harness.script_entity("killer", "kill_now")?;
    harness.fire(killer);
    assert_eq!(harness.var("still_valid"), Some(ScriptValue::Boolean(false)));
    assert_eq!(harness.var("get_ok"), Some(ScriptValue::Boolean(false)));
    Ok(())
}

#[test]
fn player_primitives() -> Result<()> {
    let harness = Harness::loaded(PRIMITIVES_SCRIPT)?;
    let giver = harness.script_entity("giver", "reward")?;
    harness.fire(giver);

    assert_eq!(harness.var("first"), Some(ScriptValue::Boolean(true)));
    assert_eq!(harness.var("second"), Some(ScriptValue::Boolean(false)));
    for key in ["bad_item_ok", "message_self_ok", "kill_player_ok", "self_is_player"] {
        assert_eq!(harness.var(key), Some(ScriptValue::Boolean(false)), "{key}");
    }
    assert_eq!(harness.var("is_player"), Some(ScriptValue::Boolean(true)));

    {
        let pool = harness.engine.pool();
        let player = pool.entity(harness.player).expect("player");
        assert_eq!(player.inventory.get("key_blue_key"), Some(&1));
        assert!(player.in_use());
        // world, player, giver and the pending message helper; both key
        // entities are gone
        assert_eq!(pool.iter().filter(|e| e.in_use()).count(), 4);
    }

    let player = harness.player.index();
    assert_eq!(
        harness.engine.drain_events(),
        vec![
            PoolEvent::CenterPrint {
                entity: player,
                text: "hello".to_string()
            },
            PoolEvent::Sound {
                entity: player,
                sample: "misc/talk1.wav".to_string()
            },
        ]
    );
    harness.engine.run_frame(1.0);
    assert_eq!(
        harness.engine.drain_events().first(),
        Some(&PoolEvent::CenterPrint {
            entity: player,
            text: "later".to_string()
        })
    );
    Ok(())
}

#[test]
fn typed_field_access() -> Result<()> {
    let harness = Harness::loaded(PRIMITIVES_SCRIPT)?;
    let entity = harness.spawn(
        r#"{"classname": "script", "targetname": "f", "script_function": "fields",
            "killtarget": "old", "origin": "8 16 32"}"#,
    )?;
    harness.fire(entity);

    assert_eq!(harness.var_string("target").as_deref(), Some("somewhere"));
    assert_eq!(harness.var_string("message").as_deref(), Some("12"));
    assert_eq!(harness.var("wait"), Some(ScriptValue::Number(2.0)));
    assert_eq!(harness.var("count"), Some(ScriptValue::Integer(4)));
    match harness.var("origin") {
        Some(ScriptValue::Vector(v)) => assert_eq!(v.to_array(), [8.0, 16.0, 32.0]),
        other => panic!("expected vector, got {other:?}"),
    }
    for key in ["readonly_ok", "unknown_ok", "bad_type_ok"] {
        assert_eq!(harness.var(key), Some(ScriptValue::Boolean(false)), "{key}");
    }
    assert_eq!(harness.var("killtarget"), None);
    let pool = harness.engine.pool();
    let fields = &pool.entity(entity).expect("entity").fields;
    assert_eq!(fields.count, 4);
    assert_eq!(fields.health, 0);
    Ok(())
}

#[test]
fn search_and_list_helpers() -> Result<()> {
    let harness = Harness::loaded(PRIMITIVES_SCRIPT)?;
    let east = harness.spawn(
        r#"{"classname": "info_notnull", "targetname": "gate", "message": "east"}"#,
    )?;
    harness.spawn(r#"{"classname": "info_notnull", "targetname": "Gate", "message": "west"}"#)?;
    harness.spawn(r#"{"classname": "info_null", "targetname": "other"}"#)?;
    let searcher = harness.script_entity("searcher", "search")?;
    harness.fire(searcher);

    assert_eq!(harness.var("gates"), Some(ScriptValue::Integer(2)));
    assert_eq!(harness.var("by_class"), Some(ScriptValue::Integer(2)));
    assert_eq!(harness.var("numeric_ok"), Some(ScriptValue::Boolean(false)));
    assert_eq!(harness.var_string("first_message").as_deref(), Some("east"));
    assert_eq!(harness.var("kept"), Some(ScriptValue::Integer(1)));
    assert_eq!(harness.var_entity("kept_first"), Some(harness.handle(east)));
    assert!(harness.var_entity("picked").is_some());
    assert_eq!(harness.var("pick_empty"), Some(ScriptValue::Boolean(true)));
    assert_eq!(harness.var("visited"), Some(ScriptValue::Integer(2)));
    Ok(())
}

#[test]
fn script_spawn() -> Result<()> {
    let harness = Harness::loaded(PRIMITIVES_SCRIPT)?;
    let spawner = harness.script_entity("spawner", "spawner")?;
    harness.fire(spawner);

    let made = harness.var_entity("made").expect("spawned handle");
    let pool = harness.engine.pool();
    let entity = made.get(&pool)?;
    assert_eq!(entity.classname(), "info_notnull");
    assert_eq!(entity.fields.angles.to_array(), [0.0, 90.0, 0.0]);
    drop(pool);
    match harness.var("made_origin") {
        Some(ScriptValue::Vector(v)) => assert_eq!(v.to_array(), [1.0, 2.0, 3.0]),
        other => panic!("expected vector, got {other:?}"),
    }
    assert_eq!(harness.var("bogus_valid"), Some(ScriptValue::Boolean(false)));
    Ok(())
}
