//! Transport-facing request and response plumbing
//!
//! Keeps the dispatcher independent of axum extractors so it can be driven
//! directly from tests.

use std::io::{self, Read};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, StatusCode, Version},
    response::{IntoResponse, Response},
};
use tracing::warn;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Source of the raw request body.
pub trait InputSource: Send {
    fn read(&mut self) -> io::Result<Bytes>;
}

/// Body already buffered by the transport.
#[derive(Debug, Default)]
pub struct BytesInput(Option<Bytes>);

impl BytesInput {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self(Some(body.into()))
    }

    pub fn empty() -> Self {
        Self(None)
    }
}

impl InputSource for BytesInput {
    fn read(&mut self) -> io::Result<Bytes> {
        Ok(self.0.take().unwrap_or_default())
    }
}

/// Adapts any blocking reader, e.g. a file or stdin.
#[derive(Debug)]
pub struct ReaderInput<R>(pub R);

impl<R: Read + Send> InputSource for ReaderInput<R> {
    fn read(&mut self) -> io::Result<Bytes> {
        let mut buffer = Vec::new();
        self.0.read_to_end(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub version: Version,
    pub content_type: Option<String>,
    /// Query parameters followed by form-encoded body parameters; later entries win.
    pub params: Vec<(String, String)>,
}

impl TransportRequest {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            content_type: None,
            params: Vec::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Builds a request from raw HTTP parts. Form-encoded bodies are consumed as
    /// parameters, in which case the returned input is empty.
    pub fn from_http(
        version: Version,
        headers: &HeaderMap,
        query: Option<&str>,
        body: Bytes,
    ) -> (Self, BytesInput) {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut params: Vec<(String, String)> = query
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        let is_form = content_type
            .as_deref()
            .is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));

        let input = if is_form {
            params.extend(url::form_urlencoded::parse(&body).into_owned());
            BytesInput::empty()
        } else {
            BytesInput::new(body)
        };

        (
            Self {
                version,
                content_type,
                params,
            },
            input,
        )
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Collects status, headers and body for a single response.
#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    version: Option<Version>,
    headers: HeaderMap,
    headers_sent: bool,
    body: Vec<u8>,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            version: None,
            headers: HeaderMap::new(),
            headers_sent: false,
            body: Vec::new(),
        }
    }

    /// Bodiless response with an explicit status line.
    pub fn status_only(status: StatusCode, version: Version) -> Self {
        let mut writer = Self::new();
        writer.status = status;
        writer.version = Some(version);
        writer.headers_sent = true;
        writer
    }

    /// Sets the content type. Only the first call has any effect.
    pub fn send_headers(&mut self, content_type: &'static str) {
        if self.headers_sent {
            warn!(content_type, "headers already sent; ignoring");
            return;
        }

        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.headers_sent = true;
    }

    pub fn write_body(&mut self, bytes: &[u8]) {
        if !self.headers_sent {
            warn!("body written before headers");
        }
        self.body.extend_from_slice(bytes);
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl IntoResponse for ResponseWriter {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if let Some(version) = self.version {
            *response.version_mut() = version;
        }
        response
    }
}
