use glam::Vec3;
use mlua::{MetaMethod, Result as LuaResult, UserData, UserDataMethods, Value};

use crate::error::ScriptError;

/// Immutable three-component vector value handed to scripts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptVector(pub Vec3);

impl UserData for ScriptVector {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("direction", |_, this, other: Value| {
            let other = to_vector(&other)?;
            Ok(ScriptVector((other - this.0).normalize_or_zero()))
        });
        methods.add_method("distance", |_, this, other: Value| {
            Ok(this.0.distance(to_vector(&other)?) as f64)
        });
        methods.add_method("lerp", |_, this, (other, fraction): (Value, f32)| {
            Ok(ScriptVector(this.0.lerp(to_vector(&other)?, fraction)))
        });
        methods.add_method("values", |_, this, ()| {
            Ok((this.0.x as f64, this.0.y as f64, this.0.z as f64))
        });

        methods.add_meta_function(MetaMethod::Add, |_, (a, b): (Value, Value)| {
            Ok(ScriptVector(to_vector(&a)? + to_vector(&b)?))
        });
        methods.add_meta_function(MetaMethod::Sub, |_, (a, b): (Value, Value)| {
            Ok(ScriptVector(to_vector(&a)? - to_vector(&b)?))
        });
        methods.add_meta_function(MetaMethod::Mul, |_, (a, b): (Value, Value)| scale(&a, &b));
        methods.add_meta_method(MetaMethod::Unm, |_, this, ()| Ok(ScriptVector(-this.0)));
        methods.add_meta_function(MetaMethod::Eq, |_, (a, b): (Value, Value)| {
            Ok(matches!((to_vector(&a), to_vector(&b)), (Ok(a), Ok(b)) if a == b))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format_vector(this.0))
        });
        methods.add_meta_method(MetaMethod::NewIndex, |_, _, _: (Value, Value)| {
            Err::<(), _>(ScriptError::ReadOnly.into())
        });
    }
}

fn scale(a: &Value, b: &Value) -> LuaResult<ScriptVector> {
    let (vector, factor) = match (to_vector(a), to_vector(b)) {
        (Ok(vector), Err(_)) => (vector, b),
        (Err(_), Ok(vector)) => (vector, a),
        _ => {
            let message = "vectors can only be scaled by a number";
            return Err(ScriptError::Argument(message.into()).into());
        }
    };
    let factor = match factor {
        Value::Integer(n) => *n as f32,
        Value::Number(n) => *n as f32,
        other => {
            return Err(ScriptError::Argument(format!(
                "vectors can only be scaled by a number, got {}",
                other.type_name()
            ))
            .into())
        }
    };
    Ok(ScriptVector(vector * factor))
}

pub(crate) fn to_vector(value: &Value) -> LuaResult<Vec3> {
    if let Value::UserData(data) = value {
        if let Ok(vector) = data.borrow::<ScriptVector>() {
            return Ok(vector.0);
        }
    }
    Err(ScriptError::Argument(format!("vector expected, got {}", value.type_name())).into())
}

pub(crate) fn format_vector(v: Vec3) -> String {
    format!("{} {} {}", v.x, v.y, v.z)
}
