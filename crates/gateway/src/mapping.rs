//! Error-mapping policy: extracting the backend's `(code, message)` envelope.
//!
//! Each [`ErrorMode`](crate::ErrorMode) locates the envelope somewhere
//! different: in the HTTP status line, in two JSON fields, in reserved record
//! fields, or in a regular-expression match over a text body. [`extract`]
//! dispatches on the configured [`ErrorPolicy`] and always produces an
//! [`ErrorEnvelope`] whose code may be unset (meaning "assume success").
//!
//! The record modes parse the body as part of extraction. The parsed record,
//! with its envelope fields cleared, is handed back in
//! [`Extraction::parsed_reply`] so the dispatcher does not parse the body a
//! second time when building the reply.
//!
//! Status ≠ 200 handling for the body-based modes happens before extraction
//! and is not this module's concern; see [`status_override`].

use std::borrow::Cow;

use serde_json::Value;

use crate::buffer::{RESERVED_CODE_FIELD, RESERVED_MESSAGE_FIELD};
use crate::{
    ErrorMode, ErrorPolicy, FieldValue, FormatError, PayloadBuffer, ReturnCode, StatusTable,
    StructuredRecord, ViewRecord,
};

/// HTTP status every body-based error mode expects.
pub const STATUS_OK: u16 = 200;

/// Longest body prefix written to diagnostic logs.
const SNIPPET_LIMIT: usize = 512;

// ---------------------------------------------------------------------------
// JSON field paths
// ---------------------------------------------------------------------------

/// Location of a value in a JSON body.
///
/// A path starting with `/` is an RFC 6901 JSON pointer; anything else is a
/// top-level object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonField {
    /// Top-level key.
    Key(String),
    /// JSON pointer.
    Pointer(String),
}

impl JsonField {
    /// Interprets a configured field path.
    pub fn parse(path: &str) -> Self {
        if path.starts_with('/') {
            Self::Pointer(path.to_string())
        } else {
            Self::Key(path.to_string())
        }
    }

    /// Finds the value this path designates.
    pub fn lookup<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        match self {
            Self::Key(key) => document.get(key.as_str()),
            Self::Pointer(pointer) => document.pointer(pointer),
        }
    }
}

impl std::fmt::Display for JsonField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(s) | Self::Pointer(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The backend's verdict on a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorEnvelope {
    /// Raw code; `None` means no error was reported.
    pub code: Option<ReturnCode>,
    /// Accompanying message, possibly empty.
    pub message: String,
}

impl ErrorEnvelope {
    /// An envelope reporting nothing.
    pub fn unset() -> Self {
        Self::default()
    }
}

/// Result of running the error-mapping policy over a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// The extracted envelope.
    pub envelope: ErrorEnvelope,
    /// Record parsed from the body by the record modes, envelope fields cleared.
    pub parsed_reply: Option<PayloadBuffer>,
}

impl Extraction {
    fn envelope(envelope: ErrorEnvelope) -> Self {
        Self {
            envelope,
            parsed_reply: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Returns the status-table code when a non-200 status overrides a
/// body-based error mode, `None` when the body should be examined.
///
/// In HTTP mode the status table is the normal extraction path, so this never
/// overrides.
pub fn status_override(mode: ErrorMode, table: &StatusTable, status: u16) -> Option<ReturnCode> {
    if mode == ErrorMode::Http || status == STATUS_OK {
        None
    } else {
        Some(table.lookup(status))
    }
}

/// Extracts the error envelope from a response.
///
/// # Errors
///
/// Returns a [`FormatError`] when the body does not have the shape the policy
/// requires. The caller treats every such error as a soft timeout.
pub fn extract(
    policy: &ErrorPolicy,
    table: &StatusTable,
    status: u16,
    body: &[u8],
) -> Result<Extraction, FormatError> {
    match policy {
        ErrorPolicy::Http => Ok(Extraction::envelope(from_status(table, status))),
        ErrorPolicy::Json {
            code_field,
            message_field,
            message_required,
        } => from_json(code_field, message_field, *message_required, body).map(Extraction::envelope),
        ErrorPolicy::Json2Struct => from_structured(body),
        ErrorPolicy::Json2View {
            code_field,
            message_field,
        } => from_view(code_field.as_str(), message_field.as_str(), body),
        ErrorPolicy::Text { pattern } => from_text(pattern, body).map(Extraction::envelope),
    }
}

fn from_status(table: &StatusTable, status: u16) -> ErrorEnvelope {
    // A plain 200 with no explicit table entry reports no error.
    let code = if status == STATUS_OK && table.exact(status).is_none() {
        None
    } else {
        Some(table.lookup(status))
    };
    ErrorEnvelope {
        code,
        message: String::new(),
    }
}

fn from_json(
    code_field: &JsonField,
    message_field: &JsonField,
    message_required: bool,
    body: &[u8],
) -> Result<ErrorEnvelope, FormatError> {
    let document: Value = serde_json::from_slice(body)?;
    if !document.is_object() {
        return Err(FormatError::MalformedJson("expected a JSON object".to_string()));
    }

    let code = match code_field.lookup(&document) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(
            n.as_i64()
                .map(ReturnCode::new)
                .ok_or_else(|| FormatError::InvalidCode(n.to_string()))?,
        ),
        Some(Value::String(s)) => Some(
            s.parse()
                .map(ReturnCode::new)
                .map_err(|_| FormatError::InvalidCode(s.clone()))?,
        ),
        Some(other) => return Err(FormatError::InvalidCode(other.to_string())),
    };

    let message = match message_field.lookup(&document) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    tracing::debug!(code = ?code, message = %message, "Extracted JSON error envelope");

    if message.is_empty() && message_required {
        return Err(FormatError::MissingMessage(message_field.to_string()));
    }

    Ok(ErrorEnvelope { code, message })
}

fn from_structured(body: &[u8]) -> Result<Extraction, FormatError> {
    let mut record = StructuredRecord::from_json(body)?;

    let code = record.fields.get_code(RESERVED_CODE_FIELD)?;
    record.fields.remove(RESERVED_CODE_FIELD);
    let message = record.fields.get_text(RESERVED_MESSAGE_FIELD)?;
    record.fields.remove(RESERVED_MESSAGE_FIELD);

    Ok(Extraction {
        envelope: ErrorEnvelope {
            code: Some(ReturnCode::new(code)),
            message,
        },
        parsed_reply: Some(PayloadBuffer::StructuredRecord(record)),
    })
}

fn from_view(code_field: &str, message_field: &str, body: &[u8]) -> Result<Extraction, FormatError> {
    if body.trim_ascii() == b"{}" {
        return Err(FormatError::EmptyObject);
    }
    let mut view = ViewRecord::from_json(body)?;

    let code = view.fields.get_code(code_field)?;
    view.reset_field(code_field, FieldValue::Long(0));
    let message = view.fields.get_text(message_field)?;
    view.reset_field(message_field, FieldValue::String(String::new()));

    Ok(Extraction {
        envelope: ErrorEnvelope {
            code: Some(ReturnCode::new(code)),
            message,
        },
        parsed_reply: Some(PayloadBuffer::ViewRecord(view)),
    })
}

fn from_text(pattern: &regex::Regex, body: &[u8]) -> Result<ErrorEnvelope, FormatError> {
    let text = String::from_utf8_lossy(body);
    let Some(captures) = pattern.captures(&text) else {
        tracing::info!("Error fields not found in text - assuming success");
        return Ok(ErrorEnvelope::unset());
    };

    let raw_code = captures.get(1).map_or("", |m| m.as_str());
    let message = captures.get(2).map_or("", |m| m.as_str()).to_string();
    tracing::info!(code = raw_code, message = %message, "Parsed text error envelope");

    let code = raw_code
        .parse::<i64>()
        .map_err(|_| FormatError::InvalidCode(raw_code.to_string()))?;
    Ok(ErrorEnvelope {
        code: Some(ReturnCode::new(code)),
        message,
    })
}

/// A printable prefix of `body` for diagnostic logs.
pub fn body_snippet(body: &[u8]) -> Cow<'_, str> {
    if body.len() <= SNIPPET_LIMIT {
        String::from_utf8_lossy(body)
    } else {
        Cow::Owned(format!(
            "{}... ({} bytes)",
            String::from_utf8_lossy(&body[..SNIPPET_LIMIT]),
            body.len()
        ))
    }
}
