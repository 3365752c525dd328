//! Schema-driven repair of schema-free parses
//!
//! Walks the schema and the parsed value in lock-step. Only `List` positions are
//! rewritten; structures recurse into declared fields and leave everything else
//! alone, since required-field enforcement belongs to the host.

use serde_json::Value;

use super::ParameterMapping;
use crate::schema::{Field, Schema};

pub(crate) fn reconcile_parameters(params: ParameterMapping, schema: &Schema) -> ParameterMapping {
    match schema {
        Schema::Struct(fields) => reconcile_fields(params, fields),
        _ => params,
    }
}

fn reconcile_fields(mut map: ParameterMapping, fields: &[Field]) -> ParameterMapping {
    for field in fields {
        if let Some(slot) = map.get_mut(&field.name) {
            let value = slot.take();
            *slot = reconcile_value(value, &field.schema);
        }
    }
    map
}

pub(crate) fn reconcile_value(value: Value, schema: &Schema) -> Value {
    match schema {
        Schema::Scalar(_) => value,
        Schema::Struct(fields) => match value {
            Value::Object(map) => Value::Object(reconcile_fields(map, fields)),
            other => other,
        },
        Schema::List(element) => {
            let items = match value {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                Value::String(text) if text.is_empty() => Vec::new(),
                // Container element holding a single occurrence of its child tag.
                Value::Object(map) if map.len() == 1 => match map.into_iter().next() {
                    Some((_, Value::Array(items))) => items,
                    Some((_, single)) => vec![single],
                    None => Vec::new(),
                },
                other => vec![other],
            };

            Value::Array(
                items
                    .into_iter()
                    .map(|item| reconcile_value(item, element))
                    .collect(),
            )
        }
    }
}
