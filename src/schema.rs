//! Schema descriptors for function parameters and return values
//!
//! A schema is a recursive shape: a typed scalar, a homogeneous list, or a keyed
//! structure. Formats use it to resolve wire ambiguities; the reference host uses
//! it to validate parameters and clean return values.

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Bool,
    Text,
    /// Any scalar, passed through untouched.
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Scalar(ParamType),
    List(Box<Schema>),
    Struct(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            path: if path.is_empty() {
                "(root)".to_string()
            } else {
                path
            },
            message: message.into(),
        }
    }
}

impl Field {
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Unexpected keys are rejected.
    Parameters,
    /// Unexpected keys are dropped.
    ReturnValue,
}

impl Schema {
    pub fn int() -> Self {
        Self::Scalar(ParamType::Int)
    }

    pub fn float() -> Self {
        Self::Scalar(ParamType::Float)
    }

    pub fn bool() -> Self {
        Self::Scalar(ParamType::Bool)
    }

    pub fn text() -> Self {
        Self::Scalar(ParamType::Text)
    }

    pub fn raw() -> Self {
        Self::Scalar(ParamType::Raw)
    }

    pub fn list(element: Schema) -> Self {
        Self::List(Box::new(element))
    }

    pub fn structure(fields: impl IntoIterator<Item = Field>) -> Self {
        Self::Struct(fields.into_iter().collect())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        match self {
            Self::Struct(fields) => fields.iter().find(|field| field.name == name),
            _ => None,
        }
    }

    /// Validates a parameter mapping against a structure schema.
    pub fn validate_parameters(&self, params: Map<String, Value>) -> Result<Map<String, Value>, SchemaError> {
        let Self::Struct(_) = self else {
            return Err(SchemaError::new("", "parameter schema must be a structure"));
        };

        match clean(Value::Object(params), self, "", Mode::Parameters)? {
            Value::Object(map) => Ok(map),
            _ => Err(SchemaError::new("", "expected a structure")),
        }
    }

    /// Coerces a raw function result into the declared return shape.
    pub fn clean_return_value(&self, value: Value) -> Result<Value, SchemaError> {
        clean(value, self, "", Mode::ReturnValue)
    }
}

fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn clean(value: Value, schema: &Schema, path: &str, mode: Mode) -> Result<Value, SchemaError> {
    match schema {
        Schema::Scalar(kind) => clean_scalar(value, *kind, path),
        Schema::List(element) => {
            let Value::Array(items) = value else {
                return Err(SchemaError::new(path, "expected a list"));
            };

            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| clean(item, element, &format!("{path}[{index}]"), mode))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Schema::Struct(fields) => {
            let Value::Object(mut map) = value else {
                return Err(SchemaError::new(path, "expected a structure"));
            };

            if mode == Mode::Parameters {
                if let Some(unexpected) = map
                    .keys()
                    .find(|key| !fields.iter().any(|field| &field.name == *key))
                {
                    return Err(SchemaError::new(
                        child_path(path, unexpected),
                        "unexpected parameter",
                    ));
                }
            }

            let mut cleaned = Map::new();
            for field in fields {
                let field_path = child_path(path, &field.name);
                match map.remove(&field.name) {
                    Some(item) => {
                        cleaned.insert(field.name.clone(), clean(item, &field.schema, &field_path, mode)?);
                    }
                    None if field.required => {
                        return Err(SchemaError::new(field_path, "missing required value"));
                    }
                    None => {}
                }
            }

            Ok(Value::Object(cleaned))
        }
    }
}

fn clean_scalar(value: Value, kind: ParamType, path: &str) -> Result<Value, SchemaError> {
    let invalid = |expected: &str| SchemaError::new(path, format!("expected {expected}"));

    match kind {
        ParamType::Int => match value {
            Value::Number(number) if number.is_i64() || number.is_u64() => Ok(Value::Number(number)),
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid("an integer")),
            Value::Bool(flag) => Ok(Value::from(i64::from(flag))),
            _ => Err(invalid("an integer")),
        },
        ParamType::Float => {
            let parsed = match &value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid("a float"))
        }
        ParamType::Bool => match value {
            Value::Bool(flag) => Ok(Value::Bool(flag)),
            Value::Number(number) => match number.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid("a boolean")),
            },
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Ok(Value::Bool(true)),
                "0" | "false" | "" => Ok(Value::Bool(false)),
                _ => Err(invalid("a boolean")),
            },
            _ => Err(invalid("a boolean")),
        },
        ParamType::Text => match value {
            Value::String(text) => Ok(Value::String(text)),
            Value::Number(number) => Ok(Value::String(number.to_string())),
            Value::Bool(flag) => Ok(Value::String(flag.to_string())),
            _ => Err(invalid("text")),
        },
        ParamType::Raw => match value {
            Value::Array(_) | Value::Object(_) => Err(invalid("a scalar")),
            other => Ok(other),
        },
    }
}
