//! Conversion between script values and `serde_json`

use std::rc::Rc;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Number, Value as JsonValue};
use thiserror::Error;

use super::value::{PropertyMap, Value, MAX_CONVERSION_DEPTH};

#[derive(Error, Debug)]
pub enum JsonError {
    #[error("Converting circular structure to JSON")]
    Circular,

    #[error("Structure is nested too deeply to convert to JSON")]
    TooDeep,

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// JSON form of a value. `Ok(None)` for values with no JSON form at the top
/// level (`undefined`, functions).
pub fn to_json(value: &Value) -> Result<Option<JsonValue>, JsonError> {
    let mut path = Vec::new();
    convert(value, &mut path)
}

fn convert(value: &Value, path: &mut Vec<usize>) -> Result<Option<JsonValue>, JsonError> {
    let json = match value {
        Value::Undefined | Value::Function(_) => return Ok(None),
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Number(n) => number(*n),
        Value::Str(s) => JsonValue::String(s.to_string()),
        Value::Array(items) => {
            enter(path, Rc::as_ptr(items) as usize)?;
            let items = items.borrow();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(convert(item, path)?.unwrap_or(JsonValue::Null));
            }
            path.pop();
            JsonValue::Array(out)
        }
        Value::Object(obj) => {
            enter(path, Rc::as_ptr(obj) as usize)?;
            let obj = obj.borrow();
            let mut out = Map::new();
            for (key, item) in obj.properties.iter() {
                if let Some(converted) = convert(item, path)? {
                    out.insert(key.clone(), converted);
                }
            }
            path.pop();
            JsonValue::Object(out)
        }
    };
    Ok(Some(json))
}

fn enter(path: &mut Vec<usize>, id: usize) -> Result<(), JsonError> {
    if path.contains(&id) {
        return Err(JsonError::Circular);
    }
    if path.len() >= MAX_CONVERSION_DEPTH {
        return Err(JsonError::TooDeep);
    }
    path.push(id);
    Ok(())
}

fn number(n: f64) -> JsonValue {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if !n.is_finite() {
        JsonValue::Null
    } else if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        JsonValue::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
    }
}

/// Serialize like `JSON.stringify(value, null, indent)`; an empty indent
/// produces compact output.
pub fn stringify(value: &Value, indent: &str) -> Result<Option<String>, JsonError> {
    let Some(json) = to_json(value)? else {
        return Ok(None);
    };
    if indent.is_empty() {
        return Ok(Some(serde_json::to_string(&json)?));
    }
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(indent.as_bytes()));
    json.serialize(&mut serializer)?;
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

pub fn from_json(json: &JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::String(s) => Value::from(s.as_str()),
        JsonValue::Array(items) => Value::new_array(items.iter().map(from_json).collect()),
        JsonValue::Object(map) => Value::new_object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_json(v)))
                .collect::<PropertyMap>(),
        ),
    }
}

/// Parse JSON text into a script value, as `JSON.parse` does.
pub fn parse(text: &str) -> Result<Value, JsonError> {
    let json: JsonValue = serde_json::from_str(text)?;
    Ok(from_json(&json))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(entries: Vec<(&str, Value)>) -> Value {
        Value::new_object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<PropertyMap>(),
        )
    }

    #[test]
    fn test_stringify_compact_preserves_key_order() {
        let value = obj(vec![
            ("z", Value::from(1.0)),
            ("a", Value::new_array(vec![Value::from("x"), Value::Undefined])),
            ("skip", Value::Undefined),
        ]);
        assert_eq!(
            stringify(&value, "").unwrap().as_deref(),
            Some(r#"{"z":1,"a":["x",null]}"#)
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(stringify(&Value::from(2.0), "").unwrap().as_deref(), Some("2"));
        assert_eq!(stringify(&Value::from(2.5), "").unwrap().as_deref(), Some("2.5"));
        assert_eq!(
            stringify(&Value::Number(f64::NAN), "").unwrap().as_deref(),
            Some("null")
        );
    }

    #[test]
    fn test_errors_serialize_as_empty_object() {
        let err = Value::new_error("Error", "boom");
        assert_eq!(stringify(&err, "  ").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_top_level_undefined_has_no_json() {
        assert!(stringify(&Value::Undefined, "").unwrap().is_none());
    }

    #[test]
    fn test_circular_detected() {
        let value = obj(vec![]);
        if let Value::Object(inner) = &value {
            inner.borrow_mut().set("self", value.clone());
        }
        assert!(matches!(stringify(&value, ""), Err(JsonError::Circular)));
        if let Value::Object(inner) = &value {
            inner.borrow_mut().properties.clear();
        }
    }

    #[test]
    fn test_shared_reference_is_not_circular() {
        let shared = Value::new_array(vec![Value::from(1.0)]);
        let value = Value::new_array(vec![shared.clone(), shared]);
        assert_eq!(stringify(&value, "").unwrap().as_deref(), Some("[[1],[1]]"));
    }

    #[test]
    fn test_parse_round_trips_structure() {
        let value = parse(r#"{"b": [1, true, null], "a": "s"}"#).unwrap();
        assert_eq!(
            stringify(&value, "").unwrap().as_deref(),
            Some(r#"{"b":[1,true,null],"a":"s"}"#)
        );
        assert!(parse("{bad").is_err());
    }
}
