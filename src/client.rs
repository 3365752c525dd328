//! Outbound web service client
//!
//! Builds the same wire shape the server accepts: token and function name in the
//! query string, parameters serialised in the body with the chosen format.

use reqwest::{header::CONTENT_TYPE, Method};
use thiserror::Error;
use url::Url;

use crate::errors::GatewayError;
use crate::format::{FormatFactory, ParameterMapping, DEFAULT_FORMAT};
use crate::rpc::server::{PARAM_FUNCTION, PARAM_TOKEN};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Format(#[from] GatewayError),
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    server_url: Url,
    token: String,
    format_name: String,
}

impl Client {
    pub fn new(
        server_url: &str,
        token: impl Into<String>,
        format: Option<&str>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::new(),
            server_url: Url::parse(server_url)?,
            token: token.into(),
            format_name: format.unwrap_or(DEFAULT_FORMAT).to_string(),
        })
    }

    /// Calls `function` once and decodes whatever body comes back, success or error envelope.
    pub async fn call(
        &self,
        method: Method,
        function: &str,
        params: &ParameterMapping,
    ) -> Result<ParameterMapping, ClientError> {
        let format = FormatFactory::create(&self.format_name)?;

        let mut url = self.server_url.clone();
        url.query_pairs_mut()
            .append_pair(PARAM_TOKEN, &self.token)
            .append_pair(PARAM_FUNCTION, function);

        let body = format.serialise(params)?;
        let response = self
            .http
            .request(method, url)
            .header(CONTENT_TYPE, self.format_name.as_str())
            .body(body)
            .send()
            .await?;
        let bytes = response.bytes().await?;

        Ok(format.deserialise(&bytes)?)
    }
}
