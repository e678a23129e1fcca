//! Typed child lookups over a parsed document tree.
//!
//! Missing or mistyped children fall back to the supplied default, the same
//! way every field of the scene document is optional at the parser level.
//! Required fields are enforced by the builders, not here.

use serde_json::{Map, Value};

pub(crate) trait JsonExt {
    fn child(&self, name: &str) -> Option<&Value>;

    fn child_array(&self, name: &str) -> Option<&Vec<Value>> {
        self.child(name).and_then(Value::as_array)
    }

    /// String child, or `""` when absent.
    fn child_str(&self, name: &str) -> &str {
        self.child(name).and_then(Value::as_str).unwrap_or("")
    }

    fn child_str_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.child(name).and_then(Value::as_str).unwrap_or(default)
    }

    fn child_i64(&self, name: &str, default: i64) -> i64 {
        self.child(name).map_or(default, |v| value_i64(v, default))
    }

    fn child_f32(&self, name: &str, default: f32) -> f32 {
        self.child(name).map_or(default, |v| value_f32(v, default))
    }

    fn child_bool(&self, name: &str, default: bool) -> bool {
        self.child(name).and_then(Value::as_bool).unwrap_or(default)
    }
}

impl JsonExt for Value {
    fn child(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl JsonExt for Map<String, Value> {
    fn child(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

pub(crate) fn value_i64(value: &Value, default: i64) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .unwrap_or(default)
}

pub(crate) fn value_f32(value: &Value, default: f32) -> f32 {
    value.as_f64().map_or(default, |f| f as f32)
}

/// Read up to `count` numbers from an array, padding the rest with zeros.
pub(crate) fn padded_f32s(value: &Value, count: usize) -> Vec<f32> {
    let mut out: Vec<f32> = value
        .as_array()
        .map(|items| items.iter().take(count).map(|v| value_f32(v, 0.0)).collect())
        .unwrap_or_default();
    out.resize(count, 0.0);
    out
}

/// Integer flavor of [`padded_f32s`].
pub(crate) fn padded_i64s(value: &Value, count: usize) -> Vec<i64> {
    let mut out: Vec<i64> = value
        .as_array()
        .map(|items| items.iter().take(count).map(|v| value_i64(v, 0)).collect())
        .unwrap_or_default();
    out.resize(count, 0);
    out
}

/// Exactly `N` numbers, or `None` when the item count differs.
pub(crate) fn fixed_f32s<const N: usize>(value: &Value) -> Option<[f32; N]> {
    let items = value.as_array()?;
    if items.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = value_f32(item, 0.0);
    }
    Some(out)
}
