//! The request dispatcher
//!
//! Gate on the protocol toggle, negotiate a format once, then authenticate,
//! parse, dispatch and respond. Every failure after negotiation is rendered
//! through the negotiated format's error envelope.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::errors::GatewayError;
use crate::format::{Format, FormatFactory};
use crate::http::transport::{InputSource, ResponseWriter, TransportRequest};
use crate::host::Host;
use crate::logging::redact_audit_params;
use crate::rpc::context::{RequestContext, RequestState};

pub const PARAM_FORMAT: &str = "wsformat";
pub const PARAM_FUNCTION: &str = "wsfunction";
pub const PARAM_TOKEN: &str = "wstoken";

pub struct Dispatcher {
    host: Arc<dyn Host>,
    format: Option<Arc<dyn Format>>,
}

impl Dispatcher {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host, format: None }
    }

    /// Skips negotiation and always uses `format`.
    pub fn with_format(mut self, format: Arc<dyn Format>) -> Self {
        self.format = Some(format);
        self
    }

    pub async fn run(self, request: &TransportRequest, input: impl InputSource) -> ResponseWriter {
        if !self.host.is_protocol_enabled() {
            warn!(version = ?request.version, "protocol disabled; rejecting request");
            return ResponseWriter::status_only(StatusCode::FORBIDDEN, request.version);
        }

        let mut context = RequestContext::new();
        let format = self.resolve_format(request);
        context.format = Some(format.name());
        context.advance(RequestState::FormatResolved);

        let mut out = ResponseWriter::new();
        let result = self.handle(&mut context, format.as_ref(), request, input).await;
        respond(&mut context, format.as_ref(), result, &mut out);

        info!(
            function = context.function_name.as_deref().unwrap_or(""),
            format = format.name(),
            params = %redact_audit_params(&context.params),
            outcome = if context.state() == RequestState::Responded { "success" } else { "failure" },
            "web service call audited"
        );

        out
    }

    /// Explicit override, then content type, then the default.
    fn resolve_format(&self, request: &TransportRequest) -> Arc<dyn Format> {
        if let Some(format) = &self.format {
            return Arc::clone(format);
        }

        let requested = request
            .param(PARAM_FORMAT)
            .map(str::to_string)
            .or_else(|| request.content_type.as_deref().and_then(format_from_content_type));

        match requested {
            Some(name) => FormatFactory::create_or_default(&name),
            None => FormatFactory::default_format(),
        }
    }

    async fn handle(
        &self,
        context: &mut RequestContext,
        format: &dyn Format,
        request: &TransportRequest,
        mut input: impl InputSource,
    ) -> Result<Option<Value>, GatewayError> {
        let token = request
            .param(PARAM_TOKEN)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GatewayError::authentication("missing_token", "web service token is required")
            })?;
        let principal = self.host.authenticate(token).await?;
        context.advance(RequestState::Authenticated);

        let function_name = request
            .param(PARAM_FUNCTION)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                GatewayError::invalid_parameter("missing_function", "wsfunction parameter is required")
            })?;
        context.function_name = Some(function_name.to_string());

        let body = input
            .read()
            .map_err(|err| GatewayError::internal(format!("failed to read request body: {err}")))?;
        let params = format.deserialise(&body)?;
        let function = self.host.resolve_function(function_name)?;
        let params = format.reconcile(params, &function.params);
        context.params = params.clone();
        context.function = Some(Arc::clone(&function));
        context.advance(RequestState::Parsed);

        let result = self.host.invoke(&function, params, &principal).await?;
        context.advance(RequestState::Dispatched);

        function
            .returns
            .as_ref()
            .map(|returns| self.host.clean_return_value(result, returns))
            .transpose()
    }
}

/// Writes the envelope for `result`. A value that fails to render is reported
/// as an error envelope and leaves the call `Errored`.
fn respond(
    context: &mut RequestContext,
    format: &dyn Format,
    result: Result<Option<Value>, GatewayError>,
    out: &mut ResponseWriter,
) {
    format.send_headers(out);
    match result {
        Ok(value) => {
            let returns = context
                .function
                .as_ref()
                .and_then(|function| function.returns.as_ref());
            if format.send_response(out, value.as_ref(), returns) {
                context.advance(RequestState::Responded);
            } else {
                context.advance(RequestState::Errored);
            }
        }
        Err(err) => {
            match &err {
                GatewayError::Internal { message } => {
                    error!(error = %message, "web service call failed with internal error")
                }
                other => warn!(class = other.class(), code = other.code(), error = %other, "web service call failed"),
            }
            format.send_error(out, &err);
            context.advance(RequestState::Errored);
        }
    }
}

/// `application/xml; charset=utf-8` → `xml`. Bare names are taken as-is.
pub fn format_from_content_type(content_type: &str) -> Option<String> {
    let media_type = content_type.split(';').next()?.trim();
    let name = media_type.strip_prefix("application/").unwrap_or(media_type);
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::http::Version;
    use serde_json::json;

    use super::*;
    use crate::errors::ErrorEnvelope;
    use crate::format::{ParameterMapping, XmlFormat};
    use crate::host::{FunctionDescriptor, FunctionRegistry, Principal, StaticHost};
    use crate::http::transport::BytesInput;
    use crate::schema::{Field, Schema};

    const TOKEN: &str = "token-1234567890ab";

    fn registry() -> FunctionRegistry {
        FunctionRegistry::new()
            .with(FunctionDescriptor::new(
                "mock_function",
                Schema::structure([Field::required("vfsStream", Schema::text())]),
                Some(Schema::bool()),
                |_params: ParameterMapping, _principal: &Principal| -> Result<Value, GatewayError> {
                    Ok(json!(true))
                },
            ))
            .with(FunctionDescriptor::new(
                "count_ids",
                Schema::structure([Field::required("ids", Schema::list(Schema::int()))]),
                Some(Schema::int()),
                |params: ParameterMapping, _principal: &Principal| -> Result<Value, GatewayError> {
                    let count = params
                        .get("ids")
                        .and_then(Value::as_array)
                        .map(Vec::len)
                        .unwrap_or_default();
                    Ok(json!(count))
                },
            ))
            .with(FunctionDescriptor::new(
                "broken_result",
                Schema::structure([]),
                Some(Schema::int()),
                |_params: ParameterMapping, _principal: &Principal| -> Result<Value, GatewayError> {
                    Ok(json!("not a number"))
                },
            ))
            .with(FunctionDescriptor::new(
                "no_result",
                Schema::structure([]),
                None,
                |_params: ParameterMapping, _principal: &Principal| -> Result<Value, GatewayError> {
                    Ok(Value::Null)
                },
            ))
    }

    fn host(enabled: bool) -> Arc<dyn Host> {
        Arc::new(
            StaticHost::new(TOKEN, Principal::new("admin"), registry()).with_protocol_enabled(enabled),
        )
    }

    fn call(function: &str) -> TransportRequest {
        TransportRequest::new(Version::HTTP_11)
            .with_param(PARAM_TOKEN, TOKEN)
            .with_param(PARAM_FUNCTION, function)
    }

    fn body_text(out: &ResponseWriter) -> String {
        String::from_utf8(out.body().to_vec()).expect("utf-8 body")
    }

    /// Delegates to XML and records which codec and envelope methods ran.
    #[derive(Default)]
    struct RecordingFormat {
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingFormat {
        fn record(&self, call: &'static str) {
            self.calls.lock().expect("calls lock").push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    impl Format for RecordingFormat {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn content_type(&self) -> &'static str {
            "application/mock"
        }

        fn serialise(&self, params: &ParameterMapping) -> Result<Vec<u8>, GatewayError> {
            self.record("serialise");
            XmlFormat.serialise(params)
        }

        fn deserialise(&self, body: &[u8]) -> Result<ParameterMapping, GatewayError> {
            self.record("deserialise");
            assert_eq!(body, b"<request><vfsStream>life saver</vfsStream></request>");
            Ok(ParameterMapping::from_iter([(
                "vfsStream".to_string(),
                json!("life saver"),
            )]))
        }

        fn reconcile(&self, params: ParameterMapping, schema: &Schema) -> ParameterMapping {
            self.record("reconcile");
            XmlFormat.reconcile(params, schema)
        }

        fn render_response(
            &self,
            value: Option<&Value>,
            schema: Option<&Schema>,
        ) -> Result<Vec<u8>, GatewayError> {
            XmlFormat.render_response(value, schema)
        }

        fn render_error(&self, error: &ErrorEnvelope) -> Result<Vec<u8>, GatewayError> {
            XmlFormat.render_error(error)
        }

        fn fallback_error(&self) -> &'static [u8] {
            XmlFormat.fallback_error()
        }

        fn send_headers(&self, out: &mut ResponseWriter) {
            self.record("send_headers");
            out.send_headers(self.content_type());
        }

        fn send_response(
            &self,
            out: &mut ResponseWriter,
            value: Option<&Value>,
            schema: Option<&Schema>,
        ) -> bool {
            self.record("send_response");
            match self.render_response(value, schema) {
                Ok(body) => {
                    out.write_body(&body);
                    true
                }
                Err(_) => false,
            }
        }

        fn send_error(&self, out: &mut ResponseWriter, err: &GatewayError) {
            self.record("send_error");
            if let Ok(body) = self.render_error(&err.envelope()) {
                out.write_body(&body);
            }
        }
    }

    #[tokio::test]
    async fn invokes_format_correctly() {
        let format = Arc::new(RecordingFormat::default());

        let out = Dispatcher::new(host(true))
            .with_format(format.clone())
            .run(
                &call("mock_function"),
                BytesInput::new("<request><vfsStream>life saver</vfsStream></request>"),
            )
            .await;

        assert_eq!(
            format.calls(),
            vec!["deserialise", "reconcile", "send_headers", "send_response"]
        );
        assert_eq!(out.content_type(), Some("application/mock"));
        assert!(body_text(&out).contains("<value>true</value>"));
    }

    #[tokio::test]
    async fn disabled_protocol_is_forbidden_without_body() {
        let format = Arc::new(RecordingFormat::default());

        let out = Dispatcher::new(host(false))
            .with_format(format.clone())
            .run(&call("mock_function"), BytesInput::new("<request/>"))
            .await;

        assert_eq!(out.status(), StatusCode::FORBIDDEN);
        assert!(out.body().is_empty());
        assert_eq!(out.content_type(), None);
        assert!(format.calls().is_empty());
    }

    #[tokio::test]
    async fn reconciles_parameters_against_function_schema() {
        let out = Dispatcher::new(host(true))
            .run(
                &call("count_ids"),
                BytesInput::new("<request><ids><id>7</id></ids></request>"),
            )
            .await;

        assert_eq!(out.status(), StatusCode::OK);
        assert!(body_text(&out).contains("<value>1</value>"), "{}", body_text(&out));
    }

    #[tokio::test]
    async fn malformed_body_renders_error_after_headers() {
        let out = Dispatcher::new(host(true))
            .run(&call("count_ids"), BytesInput::new("<trololol"))
            .await;

        let body = body_text(&out);
        assert_eq!(out.content_type(), Some("application/xml; charset=utf-8"));
        assert!(body.contains("<success>false</success>"));
        assert!(body.contains(r#"class="MalformedBodyError""#));
        assert!(body.contains(crate::format::xml::MALFORMED_XML_MESSAGE));
    }

    #[tokio::test]
    async fn missing_token_is_an_authentication_error() {
        let request = TransportRequest::new(Version::HTTP_11).with_param(PARAM_FUNCTION, "count_ids");

        let out = Dispatcher::new(host(true))
            .run(&request, BytesInput::empty())
            .await;

        let body = body_text(&out);
        assert!(out.headers_sent());
        assert!(body.contains(r#"<exception class="AuthenticationError" code="missing_token">"#));
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_before_parsing() {
        let request = TransportRequest::new(Version::HTTP_11)
            .with_param(PARAM_TOKEN, "wrong")
            .with_param(PARAM_FUNCTION, "count_ids");

        let out = Dispatcher::new(host(true))
            .run(&request, BytesInput::new("<trololol"))
            .await;

        assert!(body_text(&out).contains(r#"code="invalid_token""#));
    }

    #[tokio::test]
    async fn unknown_function_is_reported() {
        let out = Dispatcher::new(host(true))
            .run(&call("nope"), BytesInput::empty())
            .await;

        assert!(body_text(&out).contains(r#"class="UnknownFunctionError""#));
    }

    #[tokio::test]
    async fn invalid_result_is_an_invalid_response() {
        let out = Dispatcher::new(host(true))
            .run(&call("broken_result"), BytesInput::empty())
            .await;

        let body = body_text(&out);
        assert!(body.contains(r#"class="InvalidResponseError""#));
        assert!(body.contains(r#"code="invalid_response""#));
    }

    #[test]
    fn unrenderable_result_is_audited_as_failure() {
        let mut context = RequestContext::new();
        context.function = Some(Arc::new(FunctionDescriptor::new(
            "listed",
            Schema::structure([]),
            Some(Schema::list(Schema::int())),
            |_params: ParameterMapping, _principal: &Principal| -> Result<Value, GatewayError> {
                Ok(json!("text"))
            },
        )));
        let mut out = ResponseWriter::new();

        respond(&mut context, &XmlFormat, Ok(Some(json!("text"))), &mut out);

        assert_eq!(context.state(), RequestState::Errored);
        assert!(body_text(&out).contains(r#"class="InvalidResponseError""#));
    }

    #[test]
    fn rendered_result_is_audited_as_success() {
        let mut context = RequestContext::new();
        let mut out = ResponseWriter::new();

        respond(&mut context, &XmlFormat, Ok(None), &mut out);

        assert_eq!(context.state(), RequestState::Responded);
        assert!(body_text(&out).contains("<success>true</success>"));
    }

    #[tokio::test]
    async fn function_without_return_schema_sends_bare_success() {
        let out = Dispatcher::new(host(true))
            .run(&call("no_result"), BytesInput::empty())
            .await;

        let body = body_text(&out);
        assert!(body.contains("<success>true</success>"));
        assert!(!body.contains("<value"));
    }

    #[tokio::test]
    async fn negotiated_format_renders_errors_too() {
        let request = call("count_ids").with_content_type("application/json");

        let out = Dispatcher::new(host(true))
            .run(&request, BytesInput::new("{\"ids\": "))
            .await;

        let body: Value = serde_json::from_slice(out.body()).expect("json envelope");
        assert_eq!(out.content_type(), Some("application/json"));
        assert_eq!(body["exception"]["class"], json!("MalformedBodyError"));
    }

    #[test]
    fn format_parameter_beats_content_type_beats_default() {
        let dispatcher = Dispatcher::new(host(true));

        let explicit = TransportRequest::new(Version::HTTP_11)
            .with_content_type("application/xml")
            .with_param(PARAM_FORMAT, "json");
        assert_eq!(dispatcher.resolve_format(&explicit).name(), "json");

        let header_only =
            TransportRequest::new(Version::HTTP_11).with_content_type("application/json; charset=utf-8");
        assert_eq!(dispatcher.resolve_format(&header_only).name(), "json");

        let neither = TransportRequest::new(Version::HTTP_11);
        assert_eq!(dispatcher.resolve_format(&neither).name(), "xml");

        let unknown = TransportRequest::new(Version::HTTP_11).with_param(PARAM_FORMAT, "yaml");
        assert_eq!(dispatcher.resolve_format(&unknown).name(), "xml");
    }

    #[test]
    fn injected_format_skips_negotiation() {
        let dispatcher = Dispatcher::new(host(true)).with_format(Arc::new(RecordingFormat::default()));
        let request = TransportRequest::new(Version::HTTP_11).with_param(PARAM_FORMAT, "json");
        assert_eq!(dispatcher.resolve_format(&request).name(), "mock");
    }

    #[test]
    fn content_type_parsing() {
        assert_eq!(format_from_content_type("application/xml"), Some("xml".to_string()));
        assert_eq!(
            format_from_content_type("application/JSON; charset=utf-8"),
            Some("json".to_string())
        );
        assert_eq!(format_from_content_type("json"), Some("json".to_string()));
        assert_eq!(format_from_content_type("application/"), None);
    }
}
