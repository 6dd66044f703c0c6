//! Text encoding of variable tables for save games and level transitions.
//!
//! Each value becomes `"<type>:<text>"`. Only the first colon separates the
//! tag, so string values may contain colons of their own.

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::context::{ScriptValue, VariableKind, VariableTable};
use crate::error::CodecError;
use crate::handle::EntityHandle;
use crate::pool::{EntityId, EntityPool};

const TAG_NUMBER: &str = "number";
const TAG_BOOLEAN: &str = "boolean";
const TAG_STRING: &str = "string";
const TAG_ENTITY: &str = "entity";
const TAG_VECTOR: &str = "vector";

const INVALID_ENTITY: &str = "-1";

/// Both variable tables as the save subsystem stores them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedVariables {
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub persistent: BTreeMap<String, String>,
}

/// Formats a float so that it reads back as a float: integral values keep a
/// trailing `.0`.
pub(crate) fn number_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        if value.abs() < 1e16 {
            format!("{value:.1}")
        } else {
            format!("{value:e}")
        }
    } else {
        format!("{value}")
    }
}

pub fn encode_value(value: &ScriptValue, pool: &EntityPool) -> String {
    match value {
        ScriptValue::Integer(number) => format!("{TAG_NUMBER}:{number}"),
        ScriptValue::Number(number) => format!("{TAG_NUMBER}:{}", number_text(*number)),
        ScriptValue::Boolean(flag) => format!("{TAG_BOOLEAN}:{flag}"),
        ScriptValue::String(text) => format!("{TAG_STRING}:{text}"),
        ScriptValue::Entity(handle) => match handle.resolve(pool) {
            Some(id) => format!("{TAG_ENTITY}:{}", id.index()),
            None => format!("{TAG_ENTITY}:{INVALID_ENTITY}"),
        },
        ScriptValue::Vector(v) => format!("{TAG_VECTOR}:{},{},{}", v.x, v.y, v.z),
    }
}

fn malformed(key: &str, tag: &'static str, text: &str) -> CodecError {
    CodecError::Malformed {
        key: key.to_string(),
        tag,
        text: text.to_string(),
    }
}

fn decode_number(key: &str, text: &str) -> Result<ScriptValue, CodecError> {
    let looks_float = text.contains(['.', 'e', 'E', 'n', 'N']);
    if !looks_float {
        if let Ok(number) = text.parse::<i64>() {
            return Ok(ScriptValue::Integer(number));
        }
    }
    text.parse::<f64>()
        .map(ScriptValue::Number)
        .map_err(|_| malformed(key, TAG_NUMBER, text))
}

fn decode_entity(key: &str, text: &str, pool: &EntityPool) -> Result<ScriptValue, CodecError> {
    if text == INVALID_ENTITY {
        return Ok(ScriptValue::Entity(EntityHandle::invalid()));
    }
    let index: usize = text.parse().map_err(|_| malformed(key, TAG_ENTITY, text))?;
    if index >= pool.capacity() {
        return Err(CodecError::EntityOutOfRange {
            key: key.to_string(),
            index,
        });
    }
    Ok(ScriptValue::Entity(EntityHandle::wrap(
        pool,
        EntityId::new(index),
    )))
}

fn decode_vector(key: &str, text: &str) -> Result<ScriptValue, CodecError> {
    let parts = text
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| malformed(key, TAG_VECTOR, text))?;
    match parts.as_slice() {
        [x, y, z] => Ok(ScriptValue::Vector(Vec3::new(*x, *y, *z))),
        _ => Err(malformed(key, TAG_VECTOR, text)),
    }
}

pub fn decode_value(
    key: &str,
    encoded: &str,
    pool: &EntityPool,
) -> Result<ScriptValue, CodecError> {
    let (tag, text) = encoded
        .split_once(':')
        .ok_or_else(|| CodecError::MissingSeparator(key.to_string()))?;
    match tag {
        TAG_NUMBER => decode_number(key, text),
        TAG_BOOLEAN => match text {
            "true" => Ok(ScriptValue::Boolean(true)),
            "false" => Ok(ScriptValue::Boolean(false)),
            _ => Err(malformed(key, TAG_BOOLEAN, text)),
        },
        TAG_STRING => Ok(ScriptValue::String(text.to_string())),
        TAG_ENTITY => decode_entity(key, text, pool),
        TAG_VECTOR => decode_vector(key, text),
        other => Err(CodecError::UnknownType {
            key: key.to_string(),
            tag: other.to_string(),
        }),
    }
}

pub fn snapshot(table: &VariableTable, pool: &EntityPool) -> BTreeMap<String, String> {
    table
        .iter()
        .map(|(key, value)| (key.to_string(), encode_value(value, pool)))
        .collect()
}

/// Decodes `variables` into a fresh table of `kind`.
pub fn decode_table(
    kind: VariableKind,
    variables: &BTreeMap<String, String>,
    pool: &EntityPool,
) -> Result<VariableTable, CodecError> {
    let mut table = VariableTable::new(kind);
    for (key, encoded) in variables {
        let value = decode_value(key, encoded, pool)?;
        table
            .set(key, Some(value))
            .map_err(|source| CodecError::Disallowed {
                key: key.clone(),
                source,
            })?;
    }
    Ok(table)
}

/// Decodes every entry before touching `table`, so a bad entry leaves it
/// unchanged.
pub fn restore(
    table: &mut VariableTable,
    variables: &BTreeMap<String, String>,
    pool: &EntityPool,
) -> Result<(), CodecError> {
    let decoded = decode_table(table.kind(), variables, pool)?;
    table.absorb(decoded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn pool() -> EntityPool {
        EntityPool::new(&PoolConfig {
            max_clients: 1,
            max_entities: 32,
        })
    }

    #[test]
    fn numbers_keep_their_subtype() {
        let pool = pool();
        let mut table = VariableTable::new(VariableKind::Ephemeral);
        table.set("whole", Some(ScriptValue::Integer(42))).unwrap();
        table.set("float", Some(ScriptValue::Number(3.0))).unwrap();
        table.set("tiny", Some(ScriptValue::Number(1.5e-7))).unwrap();
        table.set("huge", Some(ScriptValue::Number(2e300))).unwrap();
        let saved = snapshot(&table, &pool);
        assert_eq!(saved["whole"], "number:42");
        assert_eq!(saved["float"], "number:3.0");

        let mut restored = VariableTable::new(VariableKind::Ephemeral);
        restore(&mut restored, &saved, &pool).unwrap();
        assert_eq!(restored.get("whole"), Some(&ScriptValue::Integer(42)));
        assert_eq!(restored.get("float"), Some(&ScriptValue::Number(3.0)));
        assert_eq!(restored.get("tiny"), Some(&ScriptValue::Number(1.5e-7)));
        assert_eq!(restored.get("huge"), Some(&ScriptValue::Number(2e300)));
    }

    #[test]
    fn strings_may_contain_colons() {
        let pool = pool();
        let value = decode_value("k", "string:a:b:c", &pool).unwrap();
        assert_eq!(value, ScriptValue::String("a:b:c".to_string()));
    }

    #[test]
    fn stale_handle_saves_as_invalid_and_stays_invalid() {
        let mut pool = pool();
        let id = pool.spawn().unwrap();
        let handle = EntityHandle::wrap(&pool, id);
        let live = encode_value(&ScriptValue::Entity(handle), &pool);
        assert_eq!(live, format!("entity:{}", id.index()));

        pool.free(id);
        let stale = encode_value(&ScriptValue::Entity(handle), &pool);
        assert_eq!(stale, "entity:-1");

        pool.spawn().unwrap();
        match decode_value("door", &stale, &pool).unwrap() {
            ScriptValue::Entity(restored) => {
                assert_eq!(restored, EntityHandle::invalid());
                assert!(!restored.is_valid(&pool));
            }
            other => panic!("expected entity, got {other:?}"),
        }
    }

    #[test]
    fn live_handle_round_trips_to_same_slot() {
        let mut pool = pool();
        let id = pool.spawn().unwrap();
        let encoded = encode_value(&ScriptValue::Entity(EntityHandle::wrap(&pool, id)), &pool);
        match decode_value("door", &encoded, &pool).unwrap() {
            ScriptValue::Entity(restored) => assert_eq!(restored.resolve(&pool), Some(id)),
            other => panic!("expected entity, got {other:?}"),
        }
    }

    #[test]
    fn bad_entries_are_rejected_without_partial_restore() {
        let pool = pool();
        let mut table = VariableTable::new(VariableKind::Persistent);
        let mut saved = BTreeMap::new();
        saved.insert("a".to_string(), "boolean:true".to_string());
        saved.insert("b".to_string(), "entity:0".to_string());
        let err = restore(&mut table, &saved, &pool).unwrap_err();
        assert!(matches!(err, CodecError::Disallowed { ref key, .. } if key == "b"));
        assert!(table.is_empty());

        assert_eq!(
            decode_value("x", "nonsense", &pool),
            Err(CodecError::MissingSeparator("x".to_string()))
        );
        assert!(matches!(
            decode_value("x", "table:{}", &pool),
            Err(CodecError::UnknownType { .. })
        ));
        assert!(matches!(
            decode_value("x", "entity:9999", &pool),
            Err(CodecError::EntityOutOfRange { index: 9999, .. })
        ));
    }

    #[test]
    fn unallocated_slot_restores_as_stale_handle() {
        let pool = pool();
        assert!(pool.len() < 20);
        match decode_value("far", "entity:20", &pool).unwrap() {
            ScriptValue::Entity(restored) => assert!(!restored.is_valid(&pool)),
            other => panic!("expected entity, got {other:?}"),
        }
        assert!(matches!(
            decode_value("far", "entity:32", &pool),
            Err(CodecError::EntityOutOfRange { index: 32, .. })
        ));
    }

    #[test]
    fn vectors_round_trip() {
        let pool = pool();
        let v = ScriptValue::Vector(Vec3::new(1.5, -2.0, 0.25));
        let encoded = encode_value(&v, &pool);
        assert_eq!(encoded, "vector:1.5,-2,0.25");
        assert_eq!(decode_value("v", &encoded, &pool), Ok(v));
    }
}
