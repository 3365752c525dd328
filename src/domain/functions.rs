use serde_json::{json, Value};

use crate::{
    errors::GatewayError,
    format::{FormatFactory, ParameterMapping},
    host::{FunctionDescriptor, FunctionRegistry, Principal},
    schema::{Field, Schema},
};

pub const SITE_INFO_FUNCTION: &str = "gateway_get_site_info";
pub const SUM_VALUES_FUNCTION: &str = "gateway_sum_values";

pub fn builtin_registry() -> FunctionRegistry {
    FunctionRegistry::new()
        .with(FunctionDescriptor::new(
            SITE_INFO_FUNCTION,
            Schema::structure([]),
            Some(site_info_returns()),
            site_info,
        ))
        .with(FunctionDescriptor::new(
            SUM_VALUES_FUNCTION,
            Schema::structure([Field::required("values", Schema::list(Schema::int()))]),
            Some(Schema::structure([
                Field::required("count", Schema::int()),
                Field::required("sum", Schema::int()),
            ])),
            sum_values,
        ))
}

fn site_info_returns() -> Schema {
    Schema::structure([
        Field::required("sitename", Schema::text()),
        Field::required("version", Schema::text()),
        Field::required("username", Schema::text()),
        Field::required(
            "formats",
            Schema::list(Schema::structure([Field::required("name", Schema::text())])),
        ),
    ])
}

fn site_info(_params: ParameterMapping, principal: &Principal) -> Result<Value, GatewayError> {
    let formats: Vec<Value> = FormatFactory::names()
        .into_iter()
        .map(|name| json!({ "name": name }))
        .collect();

    Ok(json!({
        "sitename": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "username": principal.username,
        "formats": formats,
    }))
}

fn sum_values(params: ParameterMapping, _principal: &Principal) -> Result<Value, GatewayError> {
    let values = params
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::invalid_parameter("invalid_parameter", "values must be a list"))?;

    let mut sum: i64 = 0;
    for value in values {
        let number = value.as_i64().ok_or_else(|| {
            GatewayError::invalid_parameter("invalid_parameter", "values must be integers")
        })?;
        sum = sum
            .checked_add(number)
            .ok_or_else(|| GatewayError::invalid_parameter("overflow", "sum does not fit in 64 bits"))?;
    }

    Ok(json!({ "count": values.len(), "sum": sum }))
}
