//! Native entity pool consumed by the scripting engine.
//!
//! Slots are recycled: freeing an entity bumps the slot's generation so
//! anything that remembered the old occupant can tell it is gone. Slot 0 is
//! the world and the next `max_clients` slots belong to players; none of them
//! are ever freed.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use glam::Vec3;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::EntityHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(usize);

impl EntityId {
    pub const WORLD: EntityId = EntityId(0);

    pub const fn new(index: usize) -> Self {
        EntityId(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ServerFlags: u32 {
        const PLAYER = 1 << 0;
        const MONSTER = 1 << 1;
    }
}

/// Entity keys reachable from scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityField {
    Classname,
    Team,
    Targetname,
    Target,
    Killtarget,
    Pathtarget,
    Deathtarget,
    Healthtarget,
    Itemtarget,
    Combattarget,
    ScriptFunction,
    ScriptArg,
    Message,
    Origin,
    Angles,
    Delay,
    Wait,
    Speed,
    Random,
    Count,
    Dmg,
    MaxHealth,
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Float,
    Integer,
    Vector,
}

impl EntityField {
    pub const ALL: [EntityField; 23] = [
        EntityField::Classname,
        EntityField::Team,
        EntityField::Targetname,
        EntityField::Target,
        EntityField::Killtarget,
        EntityField::Pathtarget,
        EntityField::Deathtarget,
        EntityField::Healthtarget,
        EntityField::Itemtarget,
        EntityField::Combattarget,
        EntityField::ScriptFunction,
        EntityField::ScriptArg,
        EntityField::Message,
        EntityField::Origin,
        EntityField::Angles,
        EntityField::Delay,
        EntityField::Wait,
        EntityField::Speed,
        EntityField::Random,
        EntityField::Count,
        EntityField::Dmg,
        EntityField::MaxHealth,
        EntityField::Health,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityField::Classname => "classname",
            EntityField::Team => "team",
            EntityField::Targetname => "targetname",
            EntityField::Target => "target",
            EntityField::Killtarget => "killtarget",
            EntityField::Pathtarget => "pathtarget",
            EntityField::Deathtarget => "deathtarget",
            EntityField::Healthtarget => "healthtarget",
            EntityField::Itemtarget => "itemtarget",
            EntityField::Combattarget => "combattarget",
            EntityField::ScriptFunction => "script_function",
            EntityField::ScriptArg => "script_arg",
            EntityField::Message => "message",
            EntityField::Origin => "origin",
            EntityField::Angles => "angles",
            EntityField::Delay => "delay",
            EntityField::Wait => "wait",
            EntityField::Speed => "speed",
            EntityField::Random => "random",
            EntityField::Count => "count",
            EntityField::Dmg => "dmg",
            EntityField::MaxHealth => "max_health",
            EntityField::Health => "health",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            EntityField::Classname
            | EntityField::Team
            | EntityField::Targetname
            | EntityField::Target
            | EntityField::Killtarget
            | EntityField::Pathtarget
            | EntityField::Deathtarget
            | EntityField::Healthtarget
            | EntityField::Itemtarget
            | EntityField::Combattarget
            | EntityField::ScriptFunction
            | EntityField::ScriptArg
            | EntityField::Message => FieldKind::String,
            EntityField::Origin | EntityField::Angles => FieldKind::Vector,
            EntityField::Delay | EntityField::Wait | EntityField::Speed | EntityField::Random => {
                FieldKind::Float
            }
            EntityField::Count
            | EntityField::Dmg
            | EntityField::MaxHealth
            | EntityField::Health => FieldKind::Integer,
        }
    }

    /// Whether scripts may assign this key.
    pub fn is_writable(self) -> bool {
        !matches!(
            self,
            EntityField::Classname
                | EntityField::Team
                | EntityField::Origin
                | EntityField::Angles
                | EntityField::MaxHealth
                | EntityField::Health
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(Option<Rc<str>>),
    Float(f32),
    Integer(i32),
    Vector(Vec3),
}

#[derive(Debug, Clone, Default)]
pub struct EntityFields {
    pub classname: Option<Rc<str>>,
    pub team: Option<Rc<str>>,
    pub targetname: Option<Rc<str>>,
    pub target: Option<Rc<str>>,
    pub killtarget: Option<Rc<str>>,
    pub pathtarget: Option<Rc<str>>,
    pub deathtarget: Option<Rc<str>>,
    pub healthtarget: Option<Rc<str>>,
    pub itemtarget: Option<Rc<str>>,
    pub combattarget: Option<Rc<str>>,
    pub script_function: Option<Rc<str>>,
    pub script_arg: Option<Rc<str>>,
    pub message: Option<Rc<str>>,
    pub origin: Vec3,
    pub angles: Vec3,
    pub delay: f32,
    pub wait: f32,
    pub speed: f32,
    pub random: f32,
    pub count: i32,
    pub dmg: i32,
    pub max_health: i32,
    pub health: i32,
}

impl EntityFields {
    pub fn get(&self, field: EntityField) -> FieldValue {
        match field {
            EntityField::Origin => FieldValue::Vector(self.origin),
            EntityField::Angles => FieldValue::Vector(self.angles),
            EntityField::Delay => FieldValue::Float(self.delay),
            EntityField::Wait => FieldValue::Float(self.wait),
            EntityField::Speed => FieldValue::Float(self.speed),
            EntityField::Random => FieldValue::Float(self.random),
            EntityField::Count => FieldValue::Integer(self.count),
            EntityField::Dmg => FieldValue::Integer(self.dmg),
            EntityField::MaxHealth => FieldValue::Integer(self.max_health),
            EntityField::Health => FieldValue::Integer(self.health),
            _ => FieldValue::String(self.string(field).cloned()),
        }
    }

    /// Stores `value` if its shape matches the key; returns false otherwise.
    pub fn set(&mut self, field: EntityField, value: FieldValue) -> bool {
        match (field, value) {
            (EntityField::Origin, FieldValue::Vector(v)) => self.origin = v,
            (EntityField::Angles, FieldValue::Vector(v)) => self.angles = v,
            (EntityField::Delay, FieldValue::Float(v)) => self.delay = v,
            (EntityField::Wait, FieldValue::Float(v)) => self.wait = v,
            (EntityField::Speed, FieldValue::Float(v)) => self.speed = v,
            (EntityField::Random, FieldValue::Float(v)) => self.random = v,
            (EntityField::Count, FieldValue::Integer(v)) => self.count = v,
            (EntityField::Dmg, FieldValue::Integer(v)) => self.dmg = v,
            (EntityField::MaxHealth, FieldValue::Integer(v)) => self.max_health = v,
            (EntityField::Health, FieldValue::Integer(v)) => self.health = v,
            (field, FieldValue::String(text)) => match self.string_slot(field) {
                Some(slot) => *slot = text,
                None => return false,
            },
            _ => return false,
        }
        true
    }

    pub fn string(&self, field: EntityField) -> Option<&Rc<str>> {
        let slot = match field {
            EntityField::Classname => &self.classname,
            EntityField::Team => &self.team,
            EntityField::Targetname => &self.targetname,
            EntityField::Target => &self.target,
            EntityField::Killtarget => &self.killtarget,
            EntityField::Pathtarget => &self.pathtarget,
            EntityField::Deathtarget => &self.deathtarget,
            EntityField::Healthtarget => &self.healthtarget,
            EntityField::Itemtarget => &self.itemtarget,
            EntityField::Combattarget => &self.combattarget,
            EntityField::ScriptFunction => &self.script_function,
            EntityField::ScriptArg => &self.script_arg,
            EntityField::Message => &self.message,
            _ => return None,
        };
        slot.as_ref()
    }

    fn string_slot(&mut self, field: EntityField) -> Option<&mut Option<Rc<str>>> {
        Some(match field {
            EntityField::Classname => &mut self.classname,
            EntityField::Team => &mut self.team,
            EntityField::Targetname => &mut self.targetname,
            EntityField::Target => &mut self.target,
            EntityField::Killtarget => &mut self.killtarget,
            EntityField::Pathtarget => &mut self.pathtarget,
            EntityField::Deathtarget => &mut self.deathtarget,
            EntityField::Healthtarget => &mut self.healthtarget,
            EntityField::Itemtarget => &mut self.itemtarget,
            EntityField::Combattarget => &mut self.combattarget,
            EntityField::ScriptFunction => &mut self.script_function,
            EntityField::ScriptArg => &mut self.script_arg,
            EntityField::Message => &mut self.message,
            _ => return None,
        })
    }
}

/// Arguments of a native use callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseEvent {
    pub target: EntityId,
    pub other: Option<EntityId>,
    pub activator: Option<EntityId>,
}

pub type NativeUse = Rc<dyn Fn(&mut EntityPool, UseEvent)>;

/// What happens when an entity is triggered.
#[derive(Clone)]
pub enum UseBehavior {
    /// Calls the level script function named by `script_function`.
    Script,
    /// Triggers every entity whose targetname matches this entity's target.
    Relay,
    Native(NativeUse),
}

impl fmt::Debug for UseBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UseBehavior::Script => f.write_str("Script"),
            UseBehavior::Relay => f.write_str("Relay"),
            UseBehavior::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// Deferred action carried by a short-lived helper entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Think {
    DelayedTrigger {
        target: EntityHandle,
        activator: Option<EntityHandle>,
    },
    DelayedKill {
        target: EntityHandle,
    },
    DelayedMessage {
        target: EntityHandle,
    },
}

#[derive(Debug, Clone)]
pub struct Entity {
    index: EntityId,
    in_use: bool,
    generation: i32,
    pub fields: EntityFields,
    pub flags: ServerFlags,
    pub take_damage: bool,
    pub dead: bool,
    /// Counts toward the level's kill total when killed.
    pub counted: bool,
    pub inventory: BTreeMap<String, u32>,
    pub use_behavior: Option<UseBehavior>,
    pub think: Option<Think>,
    pub next_think: f32,
}

impl Entity {
    fn vacant(index: EntityId, generation: i32) -> Self {
        Entity {
            index,
            in_use: false,
            generation,
            fields: EntityFields::default(),
            flags: ServerFlags::empty(),
            take_damage: false,
            dead: false,
            counted: false,
            inventory: BTreeMap::new(),
            use_behavior: None,
            think: None,
            next_think: 0.0,
        }
    }

    pub fn index(&self) -> EntityId {
        self.index
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn generation(&self) -> i32 {
        self.generation
    }

    pub fn classname(&self) -> &str {
        self.fields.classname.as_deref().unwrap_or("noclass")
    }

    pub fn is_player(&self) -> bool {
        self.flags.contains(ServerFlags::PLAYER)
    }

    pub fn is_monster(&self) -> bool {
        self.flags.contains(ServerFlags::MONSTER)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.classname(), self.index)
    }
}

/// Presentation side effects recorded for the player-facing layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolEvent {
    CenterPrint { entity: usize, text: String },
    Sound { entity: usize, sample: String },
}

pub const TALK_SOUND: &str = "misc/talk1.wav";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDef {
    pub classname: String,
    pub max: u32,
}

#[derive(Debug, Clone)]
pub struct ItemCatalog {
    items: Vec<ItemDef>,
}

impl Default for ItemCatalog {
    fn default() -> Self {
        let items = [
            ("weapon_shotgun", 1),
            ("weapon_supershotgun", 1),
            ("ammo_shells", 10),
            ("ammo_bullets", 20),
            ("item_armor_shard", 200),
            ("item_quad", 1),
            ("key_blue_key", 1),
            ("key_red_key", 1),
            ("key_data_cd", 1),
        ];
        ItemCatalog {
            items: items
                .iter()
                .map(|(classname, max)| ItemDef {
                    classname: classname.to_string(),
                    max: *max,
                })
                .collect(),
        }
    }
}

impl ItemCatalog {
    pub fn find(&self, classname: &str) -> Option<&ItemDef> {
        self.items
            .iter()
            .find(|item| item.classname.eq_ignore_ascii_case(classname))
    }

    pub fn register(&mut self, classname: impl Into<String>, max: u32) {
        self.items.push(ItemDef {
            classname: classname.into(),
            max,
        });
    }
}

/// Spawn function; returning false means the entity could not be set up.
pub type SpawnFn = fn(&mut Entity) -> bool;

fn spawn_script(entity: &mut Entity) -> bool {
    if entity.fields.script_function.is_none() {
        warn!("{entity} has no function set");
        return false;
    }
    entity.use_behavior = Some(UseBehavior::Script);
    true
}

fn spawn_relay(entity: &mut Entity) -> bool {
    entity.use_behavior = Some(UseBehavior::Relay);
    true
}

fn spawn_point(_: &mut Entity) -> bool {
    true
}

fn spawn_monster(entity: &mut Entity) -> bool {
    entity.flags |= ServerFlags::MONSTER;
    entity.take_damage = true;
    entity.counted = true;
    if entity.fields.health <= 0 {
        entity.fields.health = 20;
    }
    entity.fields.max_health = entity.fields.health;
    true
}

#[derive(Debug)]
pub struct EntityPool {
    entities: Vec<Entity>,
    max_clients: usize,
    max_entities: usize,
    time: f32,
    spawns: BTreeMap<String, SpawnFn>,
    items: ItemCatalog,
    events: Vec<PoolEvent>,
    monsters_killed: u32,
}

impl EntityPool {
    pub fn new(config: &PoolConfig) -> Self {
        let reserved = config.max_clients + 1;
        let mut entities: Vec<Entity> = (0..reserved)
            .map(|index| Entity::vacant(EntityId(index), 0))
            .collect();
        let world = &mut entities[0];
        world.in_use = true;
        world.fields.classname = Some(Rc::from("worldspawn"));

        let mut spawns: BTreeMap<String, SpawnFn> = BTreeMap::new();
        spawns.insert("script".to_string(), spawn_script);
        spawns.insert("trigger_relay".to_string(), spawn_relay);
        spawns.insert("info_notnull".to_string(), spawn_point);
        spawns.insert("info_null".to_string(), spawn_point);
        spawns.insert("monster_soldier".to_string(), spawn_monster);
        spawns.insert("monster_gunner".to_string(), spawn_monster);

        EntityPool {
            entities,
            max_clients: config.max_clients,
            max_entities: config.max_entities.max(reserved),
            time: 0.0,
            spawns,
            items: ItemCatalog::default(),
            events: Vec::new(),
            monsters_killed: 0,
        }
    }

    /// Slots allocated so far. Grows on demand up to [`EntityPool::capacity`].
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_entities
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    fn is_reserved(&self, id: EntityId) -> bool {
        id.0 <= self.max_clients
    }

    /// Brings client slot `client` into play as a player entity.
    pub fn connect_player(&mut self, client: usize) -> Option<EntityId> {
        if client >= self.max_clients {
            return None;
        }
        let player = self.entities.get_mut(client + 1)?;
        player.in_use = true;
        player.flags = ServerFlags::PLAYER;
        player.take_damage = true;
        player.fields.classname = Some(Rc::from("player"));
        player.fields.health = 100;
        player.fields.max_health = 100;
        Some(player.index)
    }

    /// Claims the first free non-reserved slot, growing the pool if needed.
    pub fn spawn(&mut self) -> Result<EntityId, PoolError> {
        let free = self
            .entities
            .iter()
            .skip(self.max_clients + 1)
            .find(|entity| !entity.in_use)
            .map(|entity| entity.index);
        let id = match free {
            Some(id) => id,
            None if self.entities.len() < self.max_entities => {
                let id = EntityId(self.entities.len());
                self.entities.push(Entity::vacant(id, 0));
                id
            }
            None => return Err(PoolError::Exhausted),
        };
        let entity = &mut self.entities[id.0];
        entity.in_use = true;
        Ok(id)
    }

    /// Releases a slot and bumps its generation. Reserved slots and slots
    /// that are already free are left alone.
    pub fn free(&mut self, id: EntityId) {
        if self.is_reserved(id) {
            debug!("refusing to free reserved entity {id}");
            return;
        }
        let Some(entity) = self.entities.get_mut(id.0) else {
            return;
        };
        if !entity.in_use {
            return;
        }
        let generation = entity.generation.wrapping_add(1);
        *entity = Entity::vacant(id, generation);
    }

    /// Removes an entity outright, crediting the kill if it was a live
    /// counted monster.
    pub fn kill(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.get(id.0) {
            if entity.in_use && entity.is_monster() && !entity.dead && entity.counted {
                self.monsters_killed += 1;
            }
        }
        self.free(id);
    }

    pub fn monsters_killed(&self) -> u32 {
        self.monsters_killed
    }

    pub fn register_spawn(&mut self, classname: &str, spawn: SpawnFn) {
        self.spawns.insert(classname.to_ascii_lowercase(), spawn);
    }

    pub fn items(&self) -> &ItemCatalog {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut ItemCatalog {
        &mut self.items
    }

    /// Runs the spawn function for the entity's classname. Entities without
    /// one, or whose spawn function refuses them, are freed.
    pub fn call_spawn(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.get(id.0) else {
            return false;
        };
        let classname = entity.classname().to_ascii_lowercase();
        if self.items.find(&classname).is_some() {
            return true;
        }
        let Some(spawn) = self.spawns.get(&classname).copied() else {
            debug!("{entity} doesn't have a spawn function");
            self.free(id);
            return false;
        };
        let accepted = spawn(&mut self.entities[id.0]);
        if !accepted {
            self.free(id);
        }
        accepted
    }

    /// Lets `player` pick up `item`. An accepted item is consumed.
    pub fn touch_item(&mut self, item: EntityId, player: EntityId) -> bool {
        let Some(classname) = self
            .entity(item)
            .filter(|entity| entity.in_use)
            .map(|entity| entity.classname().to_string())
        else {
            return false;
        };
        let Some(def) = self.items.find(&classname).cloned() else {
            return false;
        };
        let Some(holder) = self
            .entities
            .get_mut(player.0)
            .filter(|entity| entity.in_use && entity.is_player())
        else {
            return false;
        };
        let held = holder.inventory.entry(def.classname).or_insert(0);
        if *held >= def.max {
            return false;
        }
        *held += 1;
        self.free(item);
        true
    }

    /// Every live non-world entity whose string key equals `value`, ignoring
    /// ASCII case, in slot order.
    pub fn find_by_field(&self, field: EntityField, value: &str) -> Vec<EntityId> {
        self.entities
            .iter()
            .skip(1)
            .filter(|entity| entity.in_use)
            .filter(|entity| {
                entity
                    .fields
                    .string(field)
                    .is_some_and(|text| text.eq_ignore_ascii_case(value))
            })
            .map(|entity| entity.index)
            .collect()
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn advance(&mut self, seconds: f32) {
        self.time += seconds.max(0.0);
    }

    pub fn schedule_think(&mut self, id: EntityId, delay: f32, think: Think) {
        let when = self.time + delay;
        if let Some(entity) = self.entities.get_mut(id.0) {
            entity.think = Some(think);
            entity.next_think = when;
        }
    }

    /// Takes the earliest think that is due at the current time.
    pub fn take_due_think(&mut self) -> Option<(EntityId, Think)> {
        let now = self.time;
        let due = self
            .entities
            .iter()
            .filter(|entity| entity.in_use && entity.think.is_some() && entity.next_think <= now)
            .min_by(|a, b| a.next_think.total_cmp(&b.next_think))
            .map(|entity| entity.index)?;
        let entity = &mut self.entities[due.0];
        let think = entity.think.take()?;
        Some((due, think))
    }

    pub fn center_print(&mut self, id: EntityId, text: &str) {
        self.events.push(PoolEvent::CenterPrint {
            entity: id.0,
            text: text.to_string(),
        });
    }

    pub fn sound(&mut self, id: EntityId, sample: &str) {
        self.events.push(PoolEvent::Sound {
            entity: id.0,
            sample: sample.to_string(),
        });
    }

    pub fn events(&self) -> &[PoolEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<PoolEvent> {
        std::mem::take(&mut self.events)
    }
}

/// One entity as listed in a level's entity file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntitySpec {
    pub classname: String,
    #[serde(default, flatten)]
    pub keys: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> EntityPool {
        EntityPool::new(&PoolConfig {
            max_clients: 1,
            max_entities: 8,
        })
    }

    #[test]
    fn free_bumps_generation_and_slot_is_reused() {
        let mut pool = pool();
        let first = pool.spawn().expect("spawn");
        assert_eq!(first.index(), 2);
        assert_eq!(pool.entity(first).map(Entity::generation), Some(0));
        pool.free(first);
        let entity = pool.entity(first).expect("slot exists");
        assert!(!entity.in_use());
        assert_eq!(entity.generation(), 1);
        let reused = pool.spawn().expect("spawn");
        assert_eq!(reused, first);
        assert_eq!(pool.entity(reused).map(Entity::generation), Some(1));
    }

    #[test]
    fn reserved_slots_are_never_freed() {
        let mut pool = pool();
        let player = pool.connect_player(0).expect("player slot");
        pool.free(EntityId::WORLD);
        pool.free(player);
        assert!(pool.entity(EntityId::WORLD).is_some_and(Entity::in_use));
        assert!(pool.entity(player).is_some_and(Entity::in_use));
        assert_eq!(pool.entity(EntityId::WORLD).map(Entity::generation), Some(0));
    }

    #[test]
    fn pool_reports_exhaustion() {
        let mut pool = pool();
        for _ in 0..6 {
            pool.spawn().expect("room left");
        }
        assert_eq!(pool.spawn(), Err(PoolError::Exhausted));
    }

    #[test]
    fn unknown_classname_is_freed_by_call_spawn() {
        let mut pool = pool();
        let id = pool.spawn().expect("spawn");
        pool.entity_mut(id).expect("entity").fields.classname = Some(Rc::from("func_bogus"));
        assert!(!pool.call_spawn(id));
        assert!(!pool.entity(id).expect("slot").in_use());
    }

    #[test]
    fn find_by_field_ignores_case_and_world() {
        let mut pool = pool();
        let a = pool.spawn().expect("spawn");
        let b = pool.spawn().expect("spawn");
        pool.entity_mut(a).expect("a").fields.targetname = Some(Rc::from("Door"));
        pool.entity_mut(b).expect("b").fields.targetname = Some(Rc::from("door"));
        assert_eq!(pool.find_by_field(EntityField::Targetname, "DOOR"), vec![a, b]);
        pool.free(a);
        assert_eq!(pool.find_by_field(EntityField::Targetname, "door"), vec![b]);
    }

    #[test]
    fn field_keys_round_trip_by_name() {
        for field in EntityField::ALL {
            assert_eq!(EntityField::parse(field.name()), Some(field));
        }
        assert_eq!(EntityField::parse("Classname"), None);
        assert!(!EntityField::Health.is_writable());
        assert!(EntityField::Target.is_writable());
    }

    #[test]
    fn fields_reject_mismatched_shapes() {
        let mut fields = EntityFields::default();
        assert!(!fields.set(EntityField::Health, FieldValue::Float(3.0)));
        assert!(!fields.set(EntityField::Origin, FieldValue::String(None)));
        assert!(fields.set(EntityField::Wait, FieldValue::Float(2.5)));
        assert_eq!(fields.get(EntityField::Wait), FieldValue::Float(2.5));
    }

    #[test]
    fn touch_item_respects_capacity() {
        let mut pool = pool();
        let player = pool.connect_player(0).expect("player");
        let give = |pool: &mut EntityPool| {
            let item = pool.spawn().expect("spawn");
            pool.entity_mut(item).expect("item").fields.classname = Some(Rc::from("key_blue_key"));
            (item, pool.touch_item(item, player))
        };
        let (first, accepted) = give(&mut pool);
        assert!(accepted);
        assert!(!pool.entity(first).expect("slot").in_use());
        let (second, accepted) = give(&mut pool);
        assert!(!accepted);
        assert!(pool.entity(second).expect("slot").in_use());
    }

    #[test]
    fn thinks_fire_in_due_order() {
        let mut pool = pool();
        let late = pool.spawn().expect("spawn");
        let early = pool.spawn().expect("spawn");
        let think = Think::DelayedKill {
            target: EntityHandle::invalid(),
        };
        pool.schedule_think(late, 2.0, think);
        pool.schedule_think(early, 1.0, think);
        assert!(pool.take_due_think().is_none());
        pool.advance(2.5);
        assert_eq!(pool.take_due_think().map(|(id, _)| id), Some(early));
        assert_eq!(pool.take_due_think().map(|(id, _)| id), Some(late));
        assert!(pool.take_due_think().is_none());
    }
}
