//! Field extraction helpers shared by the payload decoders.
//!
//! Optional fields are read permissively: absence or an unexpected type yields a
//! default instead of an error. Only the `require_*` helpers fail.

use serde_json::{Map, Value};

use crate::{errors::Error, Result};

pub type Object = Map<String, Value>;

/// View a JSON value as an object, or fail with a parse error naming `what`.
pub fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Object> {
    value
        .as_object()
        .ok_or_else(|| Error::Parse(format!("{what} is not a JSON object")))
}

/// Read a boolean flag.
///
/// JSON booleans are taken as is and the string `"true"` (any case) counts as
/// true. Anything else, including a missing key or `null`, is `false`.
pub fn get_bool(obj: &Object, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Read a field as its raw string form.
///
/// Strings pass through unchanged; numbers, booleans and nested values are
/// rendered as their compact JSON text. Missing keys and `null` are `None`.
pub fn get_raw_string(obj: &Object, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn require_object<'a>(obj: &'a Object, key: &str) -> Result<&'a Object> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(Error::missing(key)),
        Some(v) => v.as_object().ok_or_else(|| Error::wrong_type(key, "an object")),
    }
}

pub fn require_array<'a>(obj: &'a Object, key: &str) -> Result<&'a Vec<Value>> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(Error::missing(key)),
        Some(v) => v.as_array().ok_or_else(|| Error::wrong_type(key, "an array")),
    }
}

pub fn require_i64(obj: &Object, key: &str) -> Result<i64> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(Error::missing(key)),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| Error::wrong_type(key, "a 64-bit integer")),
        // Ids are sometimes quoted to survive JavaScript clients.
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::wrong_type(key, "a 64-bit integer")),
        Some(_) => Err(Error::wrong_type(key, "a 64-bit integer")),
    }
}

pub fn require_str<'a>(obj: &'a Object, key: &str) -> Result<&'a str> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(Error::missing(key)),
        Some(v) => v.as_str().ok_or_else(|| Error::wrong_type(key, "a string")),
    }
}
