//! Pluggable wire formats
//!
//! A [`Format`] converts request bodies into parameter mappings and renders the
//! success and error envelopes sent back to the caller. Registered formats are
//! stateless and shared between requests through the [`factory`].

use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::errors::{ErrorEnvelope, GatewayError};
use crate::http::transport::ResponseWriter;
use crate::schema::Schema;

pub mod factory;
pub mod json;
pub(crate) mod reconcile;
pub mod xml;

pub use factory::{FormatFactory, DEFAULT_FORMAT};
pub use json::JsonFormat;
pub use xml::XmlFormat;

/// Schema-free, ordered view of a request or response body.
pub type ParameterMapping = Map<String, Value>;

pub trait Format: Send + Sync {
    /// Identifier used for negotiation and registry lookups.
    fn name(&self) -> &'static str;

    fn content_type(&self) -> &'static str;

    fn serialise(&self, params: &ParameterMapping) -> Result<Vec<u8>, GatewayError>;

    fn deserialise(&self, body: &[u8]) -> Result<ParameterMapping, GatewayError>;

    /// Rewrites positions the wire format cannot express unambiguously into the
    /// shape declared by `schema`. Formats with native lists need no rewriting.
    fn reconcile(&self, params: ParameterMapping, _schema: &Schema) -> ParameterMapping {
        params
    }

    fn render_response(
        &self,
        value: Option<&Value>,
        schema: Option<&Schema>,
    ) -> Result<Vec<u8>, GatewayError>;

    fn render_error(&self, error: &ErrorEnvelope) -> Result<Vec<u8>, GatewayError>;

    /// Minimal envelope written when `render_error` itself fails.
    fn fallback_error(&self) -> &'static [u8];

    fn send_headers(&self, out: &mut ResponseWriter) {
        out.send_headers(self.content_type());
    }

    /// Returns `false` when the value could not be rendered and an error
    /// envelope was written instead.
    fn send_response(
        &self,
        out: &mut ResponseWriter,
        value: Option<&Value>,
        schema: Option<&Schema>,
    ) -> bool {
        match self.render_response(value, schema) {
            Ok(body) => {
                out.write_body(&body);
                true
            }
            Err(err) => {
                warn!(format = self.name(), error = %err, "failed to render response");
                self.send_error(out, &err);
                false
            }
        }
    }

    fn send_error(&self, out: &mut ResponseWriter, err: &GatewayError) {
        match self.render_error(&err.envelope()) {
            Ok(body) => out.write_body(&body),
            Err(render_err) => {
                error!(format = self.name(), error = %render_err, "failed to render error envelope");
                out.write_body(self.fallback_error());
            }
        }
    }
}
