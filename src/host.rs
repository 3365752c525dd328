use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::{errors::GatewayError, format::ParameterMapping, schema::Schema};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(
        &self,
        params: ParameterMapping,
        principal: &Principal,
    ) -> Result<Value, GatewayError>;
}

#[async_trait]
impl<F> FunctionHandler for F
where
    F: Fn(ParameterMapping, &Principal) -> Result<Value, GatewayError> + Send + Sync,
{
    async fn call(
        &self,
        params: ParameterMapping,
        principal: &Principal,
    ) -> Result<Value, GatewayError> {
        self(params, principal)
    }
}

pub struct FunctionDescriptor {
    pub name: String,
    pub params: Schema,
    pub returns: Option<Schema>,
    pub handler: Arc<dyn FunctionHandler>,
}

impl FunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        params: Schema,
        returns: Option<Schema>,
        handler: impl FunctionHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Functions callable through the gateway, keyed by name. Built once at startup.
#[derive(Debug, Default, Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<FunctionDescriptor>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, descriptor: FunctionDescriptor) -> Self {
        self.functions
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<FunctionDescriptor>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

/// Platform services the gateway delegates to.
#[async_trait]
pub trait Host: Send + Sync {
    fn is_protocol_enabled(&self) -> bool;

    async fn authenticate(&self, token: &str) -> Result<Principal, GatewayError>;

    fn resolve_function(&self, name: &str) -> Result<Arc<FunctionDescriptor>, GatewayError>;

    async fn invoke(
        &self,
        function: &FunctionDescriptor,
        params: ParameterMapping,
        principal: &Principal,
    ) -> Result<Value, GatewayError>;

    fn clean_return_value(&self, value: Value, returns: &Schema) -> Result<Value, GatewayError>;
}

/// Single-token host backed by an in-process registry.
#[derive(Debug, Clone)]
pub struct StaticHost {
    enabled: bool,
    token: Arc<str>,
    principal: Principal,
    registry: FunctionRegistry,
}

impl StaticHost {
    pub fn new(
        token: impl Into<Arc<str>>,
        principal: Principal,
        registry: FunctionRegistry,
    ) -> Self {
        Self {
            enabled: true,
            token: token.into(),
            principal,
            registry,
        }
    }

    pub fn with_protocol_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }
}

#[async_trait]
impl Host for StaticHost {
    fn is_protocol_enabled(&self) -> bool {
        self.enabled
    }

    async fn authenticate(&self, token: &str) -> Result<Principal, GatewayError> {
        if token != self.token.as_ref() {
            return Err(GatewayError::authentication(
                "invalid_token",
                "invalid web service token",
            ));
        }

        Ok(self.principal.clone())
    }

    fn resolve_function(&self, name: &str) -> Result<Arc<FunctionDescriptor>, GatewayError> {
        self.registry
            .get(name)
            .ok_or_else(|| GatewayError::unknown_function(name))
    }

    async fn invoke(
        &self,
        function: &FunctionDescriptor,
        params: ParameterMapping,
        principal: &Principal,
    ) -> Result<Value, GatewayError> {
        let params = function.params.validate_parameters(params)?;
        function.handler.call(params, principal).await
    }

    fn clean_return_value(&self, value: Value, returns: &Schema) -> Result<Value, GatewayError> {
        returns
            .clean_return_value(value)
            .map_err(|err| GatewayError::invalid_response(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::Field;

    fn host() -> StaticHost {
        let registry = FunctionRegistry::new().with(FunctionDescriptor::new(
            "double",
            Schema::structure([Field::required("n", Schema::int())]),
            Some(Schema::int()),
            |params: ParameterMapping, _principal: &Principal| -> Result<Value, GatewayError> {
                let n = params.get("n").and_then(Value::as_i64).unwrap_or_default();
                Ok(json!(n * 2))
            },
        ));
        StaticHost::new("secret", Principal::new("tester"), registry)
    }

    #[tokio::test]
    async fn authenticates_configured_token_only() {
        let host = host();
        assert_eq!(
            host.authenticate("secret").await.expect("valid token"),
            Principal::new("tester")
        );

        let err = host.authenticate("nope").await.expect_err("invalid token");
        assert_eq!(err.code(), "invalid_token");
    }

    #[tokio::test]
    async fn invokes_with_validated_parameters() {
        let host = host();
        let function = host.resolve_function("double").expect("registered");
        let Value::Object(params) = json!({"n": "21"}) else {
            unreachable!()
        };

        let result = host
            .invoke(&function, params, &Principal::new("tester"))
            .await
            .expect("invocation");
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected_before_invocation() {
        let host = host();
        let function = host.resolve_function("double").expect("registered");

        let err = host
            .invoke(&function, ParameterMapping::new(), &Principal::new("tester"))
            .await
            .expect_err("missing parameter");
        assert!(matches!(err, GatewayError::InvalidParameter { .. }));
    }

    #[test]
    fn unknown_function_is_reported() {
        let err = host().resolve_function("missing").expect_err("unknown");
        assert!(matches!(err, GatewayError::UnknownFunction { .. }));
    }

    #[test]
    fn return_cleaning_failures_are_invalid_responses() {
        let err = host()
            .clean_return_value(json!("many"), &Schema::int())
            .expect_err("not an int");
        assert!(matches!(err, GatewayError::InvalidResponse { .. }));
    }
}
