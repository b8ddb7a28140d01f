//! Error taxonomy for the gateway domain.
//!
//! Every failure detected while serving a call falls into one of three
//! classes, each with a fixed disposition toward the bus:
//!
//! | Class | Disposition |
//! |-------|-------------|
//! | [`GatewayError::Configuration`] | hard failure, never retried |
//! | [`GatewayError::Format`] | soft timeout, the caller retries |
//! | [`GatewayError::Transport`] | soft timeout on timeouts, hard failure otherwise |
//!
//! Well-formed application errors reported by a backend are not errors in this
//! sense; they travel as [`crate::ErrorEnvelope`] values and are classified by
//! [`crate::outcome::normalize`].
//!
//! [`ConfigError`] covers load-time validation of the gateway configuration
//! and [`BusError`] covers failures reported by the bus collaborator.

use thiserror::Error;

use crate::{BufferFormat, ErrorMode, OutcomeKind};

// ---------------------------------------------------------------------------
// Dispatch-time errors
// ---------------------------------------------------------------------------

/// Errors raised while serving one call.
///
/// None of these ever reach the bus directly: the dispatcher resolves each to
/// an [`OutcomeKind`] via [`GatewayError::outcome_kind`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The service configuration cannot serve this call.
    ///
    /// Produced by: unknown service name, buffer format / error mode mismatch,
    /// request payload that cannot be serialized.
    #[error("Configuration error for service '{service}': {message}")]
    Configuration {
        /// Name of the service being dispatched.
        service: String,
        /// Operator-actionable description of the defect.
        message: String,
    },

    /// The backend response could not be interpreted.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The HTTP exchange failed before a complete response was read.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl GatewayError {
    /// Builds the error raised when a buffer format is sent with an error mode
    /// it does not support.
    pub fn incompatible(service: impl Into<String>, format: BufferFormat, mode: ErrorMode) -> Self {
        Self::Configuration {
            service: service.into(),
            message: format!(
                "{format} buffers cannot be handled with error mode '{mode}'; allowed: {}",
                format
                    .allowed_error_modes()
                    .iter()
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// The canonical outcome this error resolves to.
    pub fn outcome_kind(&self) -> OutcomeKind {
        match self {
            Self::Configuration { .. } => OutcomeKind::GenericFailure,
            Self::Format(_) => OutcomeKind::SoftTimeout,
            Self::Transport(t) => t.outcome_kind(),
        }
    }
}

// ---------------------------------------------------------------------------

/// A payload or response body did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    /// The body is not valid JSON, or not the JSON shape the format requires.
    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    /// A JSON value cannot be represented in the target record.
    #[error("Unsupported value for field '{field}': {detail}")]
    UnsupportedValue {
        /// Field carrying the value.
        field: String,
        /// What was found instead of a number or a string.
        detail: String,
    },

    /// A field required to extract the error envelope is absent.
    #[error("Missing field '{0}'")]
    MissingField(String),

    /// The extracted code is not an integer.
    #[error("Invalid code '{0}'")]
    InvalidCode(String),

    /// The envelope has no message although the service requires one.
    #[error("Missing message in field '{0}'")]
    MissingMessage(String),

    /// A view body is the empty object `{}`.
    #[error("Empty JSON object where a view was expected")]
    EmptyObject,

    /// A text payload is not valid UTF-8.
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    /// The body exceeds the maximum buffer size configured for the service.
    #[error("Payload of {size} bytes exceeds the maximum of {max} bytes")]
    TooLarge {
        /// Actual body size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

impl From<serde_json::Error> for FormatError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedJson(e.to_string())
    }
}

// ---------------------------------------------------------------------------

/// The HTTP exchange failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// No response arrived within the service timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection refused, DNS failure, TLS failure, or any other network error.
    #[error("Network error: {0}")]
    Network(String),

    /// A response arrived but its body could not be read to the end.
    #[error("Failed to read response body: {0}")]
    BodyRead(String),
}

impl TransportError {
    /// The canonical outcome this failure resolves to.
    pub fn outcome_kind(&self) -> OutcomeKind {
        match self {
            Self::Timeout | Self::BodyRead(_) => OutcomeKind::SoftTimeout,
            Self::Network(_) => OutcomeKind::GenericFailure,
        }
    }
}

// ---------------------------------------------------------------------------
// Load-time errors
// ---------------------------------------------------------------------------

/// The gateway configuration is invalid.
///
/// Produced at load time; the gateway never starts with an invalid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field has no value in either the service or the defaults.
    #[error("Service '{service}': missing required field '{field}'")]
    MissingField {
        /// Service being resolved.
        service: String,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field has a value that cannot be used.
    #[error("Service '{service}': invalid value for '{field}': {message}")]
    InvalidField {
        /// Service being resolved.
        service: String,
        /// Name of the offending field.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },

    /// The service name is empty.
    #[error("Service names must not be empty")]
    EmptyServiceName,
}

// ---------------------------------------------------------------------------
// Bus collaborator errors
// ---------------------------------------------------------------------------

/// A failure reported by the transaction-processing bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The inbound call could not be bound to the execution slot.
    #[error("Failed to bind inbound call: {0}")]
    Bind(String),

    /// The request buffer could not be grown to the requested size.
    #[error("Failed to grow buffer of {size} bytes to {requested} bytes")]
    Grow {
        /// Current payload size.
        size: usize,
        /// Requested capacity.
        requested: usize,
    },

    /// The reply could not be delivered to the caller.
    #[error("Failed to respond to caller: {0}")]
    Respond(String),
}
