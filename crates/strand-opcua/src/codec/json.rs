// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Reversible JSON encoding.
//!
//! Structures are JSON objects with PascalCase field names. `Int64` and
//! `UInt64` are strings so they survive JavaScript number precision, and
//! non-finite floats use the strings `"NaN"`, `"Infinity"` and `"-Infinity"`.

use serde_json::{Map, Number, Value};

use super::extension::TypeRegistry;
use crate::error::{CodecError, CodecResult};

// =============================================================================
// JsonEncodable
// =============================================================================

/// A value with a reversible JSON representation.
pub trait JsonEncodable: Sized {
    /// Converts the value to JSON.
    fn to_json(&self) -> CodecResult<Value>;

    /// Reads the value from JSON.
    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self>;
}

/// Converts a snake_case field name to its PascalCase JSON name.
pub(crate) fn pascal_case(field: &str) -> String {
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

// =============================================================================
// Object helpers
// =============================================================================

/// Builder for JSON objects that skips null members.
#[derive(Debug, Default)]
pub struct JsonObject {
    map: Map<String, Value>,
}

impl JsonObject {
    /// Creates an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a raw value unless it is null.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        if !value.is_null() {
            self.map.insert(name.into(), value);
        }
    }

    /// Inserts a raw value, keeping an explicit null.
    pub fn insert_nullable(&mut self, name: impl Into<String>, value: Value) {
        self.map.insert(name.into(), value);
    }

    /// Encodes and inserts a field.
    pub fn field<T: JsonEncodable>(&mut self, name: impl Into<String>, value: &T) -> CodecResult<()> {
        let value = value.to_json()?;
        self.insert(name, value);
        Ok(())
    }

    /// Encodes and inserts an optional field.
    pub fn optional<T: JsonEncodable>(
        &mut self,
        name: impl Into<String>,
        value: Option<&T>,
    ) -> CodecResult<()> {
        if let Some(value) = value {
            self.field(name, value)?;
        }
        Ok(())
    }

    /// Finishes the object.
    pub fn into_value(self) -> Value {
        Value::Object(self.map)
    }
}

/// Read access to the members of a JSON object.
#[derive(Debug, Clone, Copy)]
pub struct JsonFields<'v> {
    map: &'v Map<String, Value>,
    registry: &'v TypeRegistry,
    what: &'static str,
}

impl<'v> JsonFields<'v> {
    /// Wraps `value`, which must be an object.
    pub fn new(
        value: &'v Value,
        what: &'static str,
        registry: &'v TypeRegistry,
    ) -> CodecResult<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                map,
                registry,
                what,
            }),
            other => Err(CodecError::json(format!(
                "{} must be an object, found {}",
                what,
                kind(other)
            ))),
        }
    }

    /// Returns a raw member.
    pub fn raw(&self, name: &str) -> Option<&'v Value> {
        self.map.get(name).filter(|v| !v.is_null())
    }

    /// Returns `true` when the member is present, even as null.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Reads a member, falling back to the default when absent or null.
    pub fn get<T: JsonEncodable + Default>(&self, name: &str) -> CodecResult<T> {
        Ok(self.optional(name)?.unwrap_or_default())
    }

    /// Reads an optional member.
    pub fn optional<T: JsonEncodable>(&self, name: &str) -> CodecResult<Option<T>> {
        match self.raw(name) {
            Some(value) => T::from_json(value, self.registry)
                .map(Some)
                .map_err(|e| CodecError::json(format!("{}.{}: {}", self.what, name, e))),
            None => Ok(None),
        }
    }

    /// Reads a required member.
    pub fn required<T: JsonEncodable>(&self, name: &str) -> CodecResult<T> {
        self.optional(name)?.ok_or_else(|| {
            CodecError::json(format!("{} is missing required member '{}'", self.what, name))
        })
    }
}

/// Short name of a JSON value kind for error messages.
pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn expect_str<'v>(value: &'v Value, what: &str) -> CodecResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| CodecError::json(format!("{} must be a string, found {}", what, kind(value))))
}

// =============================================================================
// Primitive implementations
// =============================================================================

impl JsonEncodable for bool {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::Bool(*self))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        value
            .as_bool()
            .ok_or_else(|| CodecError::json(format!("expected boolean, found {}", kind(value))))
    }
}

macro_rules! impl_json_integer {
    ($($ty:ty),*) => {
        $(
            impl JsonEncodable for $ty {
                fn to_json(&self) -> CodecResult<Value> {
                    Ok(Value::from(*self))
                }

                fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
                    let wide = value
                        .as_i64()
                        .ok_or_else(|| CodecError::json(format!(
                            "expected {}, found {}", stringify!($ty), kind(value)
                        )))?;
                    <$ty>::try_from(wide).map_err(|_| {
                        CodecError::json(format!("{} out of range for {}", wide, stringify!($ty)))
                    })
                }
            }
        )*
    };
}

impl_json_integer!(i8, u8, i16, u16, i32, u32);

macro_rules! impl_json_wide_integer {
    ($($ty:ty),*) => {
        $(
            impl JsonEncodable for $ty {
                fn to_json(&self) -> CodecResult<Value> {
                    Ok(Value::String(self.to_string()))
                }

                fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
                    match value {
                        Value::String(s) => s.parse().map_err(|_| {
                            CodecError::json(format!("invalid {} '{}'", stringify!($ty), s))
                        }),
                        Value::Number(n) => n
                            .to_string()
                            .parse()
                            .map_err(|_| CodecError::json(format!("invalid {} {}", stringify!($ty), n))),
                        other => Err(CodecError::json(format!(
                            "expected {}, found {}", stringify!($ty), kind(other)
                        ))),
                    }
                }
            }
        )*
    };
}

impl_json_wide_integer!(i64, u64);

fn float_to_json(value: f64) -> Value {
    if value.is_nan() {
        Value::String("NaN".to_string())
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        Value::String(text.to_string())
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn float_from_json(value: &Value) -> CodecResult<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CodecError::json(format!("invalid floating point number {}", n))),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(CodecError::json(format!("invalid floating point text '{}'", other))),
        },
        other => Err(CodecError::json(format!("expected number, found {}", kind(other)))),
    }
}

impl JsonEncodable for f64 {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(float_to_json(*self))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        float_from_json(value)
    }
}

impl JsonEncodable for f32 {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(float_to_json(f64::from(*self)))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        Ok(float_from_json(value)? as f32)
    }
}

impl JsonEncodable for String {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::String(self.clone()))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        expect_str(value, "String").map(str::to_string)
    }
}

impl<T: JsonEncodable> JsonEncodable for Vec<T> {
    fn to_json(&self) -> CodecResult<Value> {
        self.iter()
            .map(JsonEncodable::to_json)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array)
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    T::from_json(item, registry)
                        .map_err(|e| CodecError::json(format!("[{}]: {}", index, e)))
                })
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(CodecError::json(format!("expected array, found {}", kind(other)))),
        }
    }
}

impl<T: JsonEncodable> JsonEncodable for Option<Vec<T>> {
    fn to_json(&self) -> CodecResult<Value> {
        match self {
            Some(items) => items.to_json(),
            None => Ok(Value::Null),
        }
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => Vec::<T>::from_json(other, registry).map(Some),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("request_header"), "RequestHeader");
        assert_eq!(pascal_case("max_age"), "MaxAge");
        assert_eq!(pascal_case("value"), "Value");
    }

    #[test]
    fn test_wide_integers_are_strings() {
        let registry = TypeRegistry::new();
        assert_eq!(i64::MIN.to_json().unwrap(), json!("-9223372036854775808"));
        assert_eq!(
            u64::from_json(&json!("18446744073709551615"), &registry).unwrap(),
            u64::MAX
        );
        assert_eq!(i64::from_json(&json!(42), &registry).unwrap(), 42);
    }

    #[test]
    fn test_non_finite_floats() {
        let registry = TypeRegistry::new();
        assert_eq!(f64::INFINITY.to_json().unwrap(), json!("Infinity"));
        assert!(f64::from_json(&json!("NaN"), &registry).unwrap().is_nan());
        assert_eq!(f32::from_json(&json!(1.5), &registry).unwrap(), 1.5f32);
    }

    #[test]
    fn test_integer_range_checked() {
        let registry = TypeRegistry::new();
        assert!(u8::from_json(&json!(256), &registry).is_err());
        assert!(i16::from_json(&json!("1"), &registry).is_err());
    }

    #[test]
    fn test_null_array_distinct_from_empty() {
        let registry = TypeRegistry::new();
        assert_eq!(None::<Vec<u32>>.to_json().unwrap(), Value::Null);
        assert_eq!(
            Option::<Vec<u32>>::from_json(&json!([]), &registry).unwrap(),
            Some(vec![])
        );
        assert_eq!(
            Option::<Vec<u32>>::from_json(&Value::Null, &registry).unwrap(),
            None
        );
    }

    #[test]
    fn test_json_fields() {
        let registry = TypeRegistry::new();
        let value = json!({"Name": "pump", "Count": 3});
        let fields = JsonFields::new(&value, "Sample", &registry).unwrap();
        assert_eq!(fields.required::<String>("Name").unwrap(), "pump");
        assert_eq!(fields.get::<u32>("Count").unwrap(), 3);
        assert_eq!(fields.get::<u32>("Missing").unwrap(), 0);
        assert!(fields.required::<u32>("Missing").is_err());
    }
}
