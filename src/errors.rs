use thiserror::Error;

use crate::schema::SchemaError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("malformed {format} body: {message}")]
    MalformedBody {
        format: &'static str,
        message: &'static str,
    },
    #[error("unknown format: {name}")]
    UnknownFormat { name: String },
    #[error("authentication failed: {message}")]
    Authentication {
        code: &'static str,
        message: &'static str,
    },
    #[error("unknown function: {name}")]
    UnknownFunction { name: String },
    #[error("invalid parameter: {message}")]
    InvalidParameter { code: &'static str, message: String },
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
    #[error("{class}: {message}")]
    Host {
        class: String,
        code: String,
        message: String,
    },
    #[error("internal error")]
    Internal { message: String },
}

/// Wire-level description of an error, independent of the format rendering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub class: String,
    pub code: String,
    pub message: String,
}

impl GatewayError {
    pub fn malformed_body(format: &'static str, message: &'static str) -> Self {
        Self::MalformedBody { format, message }
    }

    pub fn unknown_format(name: impl Into<String>) -> Self {
        Self::UnknownFormat { name: name.into() }
    }

    pub fn authentication(code: &'static str, message: &'static str) -> Self {
        Self::Authentication { code, message }
    }

    pub fn unknown_function(name: impl Into<String>) -> Self {
        Self::UnknownFunction { name: name.into() }
    }

    pub fn invalid_parameter(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn host(
        class: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Host {
            class: class.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn class(&self) -> &str {
        match self {
            Self::MalformedBody { .. } => "MalformedBodyError",
            Self::UnknownFormat { .. } => "UnknownFormatError",
            Self::Authentication { .. } => "AuthenticationError",
            Self::UnknownFunction { .. } => "UnknownFunctionError",
            Self::InvalidParameter { .. } => "InvalidParameterError",
            Self::InvalidResponse { .. } => "InvalidResponseError",
            Self::Host { class, .. } => class,
            Self::Internal { .. } => "InternalError",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::MalformedBody { .. } => "malformed_body",
            Self::UnknownFormat { .. } => "unknown_format",
            Self::Authentication { code, .. } => code,
            Self::UnknownFunction { .. } => "unknown_function",
            Self::InvalidParameter { code, .. } => code,
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Host { code, .. } => code,
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Builds the envelope sent to the caller. Internal details never leave the process.
    pub fn envelope(&self) -> ErrorEnvelope {
        let message = match self {
            Self::MalformedBody { message, .. } => message.to_string(),
            Self::UnknownFormat { name } => format!("format '{name}' is not registered"),
            Self::Authentication { message, .. } => message.to_string(),
            Self::UnknownFunction { name } => format!("function '{name}' does not exist"),
            Self::InvalidParameter { message, .. } => message.clone(),
            Self::InvalidResponse { message } => message.clone(),
            Self::Host { message, .. } => message.clone(),
            Self::Internal { .. } => "internal server error".to_string(),
        };

        ErrorEnvelope {
            class: self.class().to_string(),
            code: self.code().to_string(),
            message,
        }
    }
}

impl From<SchemaError> for GatewayError {
    fn from(err: SchemaError) -> Self {
        Self::invalid_parameter("invalid_parameter", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_details() {
        let envelope = GatewayError::internal("database password leaked").envelope();
        assert_eq!(envelope.class, "InternalError");
        assert_eq!(envelope.code, "internal_error");
        assert_eq!(envelope.message, "internal server error");
    }

    #[test]
    fn host_errors_carry_their_own_class_and_code() {
        let envelope = GatewayError::host("X", "1", "message").envelope();
        assert_eq!(
            envelope,
            ErrorEnvelope {
                class: "X".to_string(),
                code: "1".to_string(),
                message: "message".to_string(),
            }
        );
    }

    #[test]
    fn malformed_body_names_its_format() {
        let err = GatewayError::malformed_body("xml", "unparseable");
        assert_eq!(err.to_string(), "malformed xml body: unparseable");
        assert_eq!(err.envelope().message, "unparseable");
    }

    #[test]
    fn schema_errors_become_invalid_parameters() {
        let err: GatewayError = SchemaError::new("values[1]", "expected an integer").into();
        assert_eq!(err.class(), "InvalidParameterError");
        assert!(err.envelope().message.contains("values[1]"));
    }
}
