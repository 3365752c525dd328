//! JSON wire format
//!
//! JSON carries lists natively, so parsed bodies already have the right shape
//! and the default (no-op) reconciliation applies.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Format, ParameterMapping};
use crate::errors::{ErrorEnvelope, GatewayError};
use crate::schema::Schema;

pub const MALFORMED_JSON_MESSAGE: &str = "request body could not be parsed as a valid json object";

const FALLBACK_ERROR: &[u8] = br#"{"success":false,"exception":{"class":"InternalError","code":"internal_error","message":"internal server error"}}"#;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormat;

impl JsonFormat {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Serialize)]
struct SuccessEnvelope<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Value>,
}

impl Format for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialise(&self, params: &ParameterMapping) -> Result<Vec<u8>, GatewayError> {
        serde_json::to_vec(params)
            .map_err(|err| GatewayError::internal(format!("failed to write json: {err}")))
    }

    fn deserialise(&self, body: &[u8]) -> Result<ParameterMapping, GatewayError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ParameterMapping::new());
        }

        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(params)) => Ok(params),
            Ok(other) => {
                debug!(kind = json_kind(&other), "rejecting non-object json body");
                Err(GatewayError::malformed_body(self.name(), MALFORMED_JSON_MESSAGE))
            }
            Err(err) => {
                debug!(detail = %err, "rejecting malformed json body");
                Err(GatewayError::malformed_body(self.name(), MALFORMED_JSON_MESSAGE))
            }
        }
    }

    fn render_response(
        &self,
        value: Option<&Value>,
        schema: Option<&Schema>,
    ) -> Result<Vec<u8>, GatewayError> {
        let envelope = SuccessEnvelope {
            success: true,
            value: schema.and(value),
        };
        serde_json::to_vec(&envelope)
            .map_err(|err| GatewayError::internal(format!("failed to write json: {err}")))
    }

    fn render_error(&self, error: &ErrorEnvelope) -> Result<Vec<u8>, GatewayError> {
        let body = json!({
            "success": false,
            "exception": {
                "class": error.class,
                "code": error.code,
                "message": error.message,
            }
        });
        serde_json::to_vec(&body)
            .map_err(|err| GatewayError::internal(format!("failed to write json: {err}")))
    }

    fn fallback_error(&self) -> &'static [u8] {
        FALLBACK_ERROR
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
