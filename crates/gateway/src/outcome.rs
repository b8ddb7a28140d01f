//! Outcome normalization and the bus-visible reply vocabulary.
//!
//! [`normalize`] is the single point where heterogeneous backend codes become
//! one of four canonical [`OutcomeKind`]s. A [`Reply`] is then built from the
//! outcome; its constructor is the only way to produce one, so the bus can only
//! ever observe the four legal status/flag combinations:
//!
//! | Outcome | Status | Soft flag |
//! |---------|--------|-----------|
//! | `Success` | success | none |
//! | `SoftTimeout` | fail | timeout |
//! | `SoftNotFound` | fail | not found |
//! | `GenericFailure` | fail | none |

use crate::{CodeVocabulary, PayloadBuffer, ReturnCode};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Canonical classification of a dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// The call succeeded.
    Success,
    /// The call failed but may be retried later.
    SoftTimeout,
    /// The requested entity does not exist; the caller may retry elsewhere.
    SoftNotFound,
    /// The call failed permanently.
    GenericFailure,
}

impl OutcomeKind {
    /// Returns `true` for [`OutcomeKind::Success`].
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Turns a success into a generic failure; failures are kept as they are.
    ///
    /// Used when a non-200 HTTP status overrides a body-based error mode: the
    /// call fails even if the status table maps the status to success.
    pub fn into_failure(self) -> Self {
        match self {
            Self::Success => Self::GenericFailure,
            other => other,
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::SoftTimeout => "soft-timeout",
            Self::SoftNotFound => "soft-not-found",
            Self::GenericFailure => "failure",
        };
        f.write_str(name)
    }
}

/// An [`OutcomeKind`] with an optional human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Classification.
    pub kind: OutcomeKind,
    /// Backend message or failure description.
    pub message: Option<String>,
}

impl Outcome {
    /// Creates an outcome, dropping empty messages.
    pub fn new(kind: OutcomeKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            message: (!message.is_empty()).then_some(message),
        }
    }
}

/// Maps a raw code onto an outcome.
///
/// Total: an unset code or the success sentinel is a success, the timeout and
/// not-found sentinels are soft failures, everything else is a generic failure.
pub fn normalize(code: Option<ReturnCode>, vocabulary: CodeVocabulary) -> OutcomeKind {
    let kind = match code {
        None => OutcomeKind::Success,
        Some(c) if c == vocabulary.success() => OutcomeKind::Success,
        Some(c) if c == vocabulary.timeout() => OutcomeKind::SoftTimeout,
        Some(c) if c == vocabulary.not_found() => OutcomeKind::SoftNotFound,
        Some(_) => OutcomeKind::GenericFailure,
    };
    tracing::info!(code = ?code.map(ReturnCode::as_i64), outcome = %kind, "Normalized return code");
    kind
}

// ---------------------------------------------------------------------------
// Bus reply
// ---------------------------------------------------------------------------

/// Whether the call succeeded, as seen by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    /// Success.
    Success,
    /// Failure.
    Fail,
}

/// Retry hint attached to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftFlag {
    /// Soft timeout: retry later.
    Timeout,
    /// Soft not-found.
    NotFound,
}

/// The reply handed back to the bus for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    status: CallStatus,
    soft_flag: Option<SoftFlag>,
    code: ReturnCode,
    message: Option<String>,
    buffer: Option<PayloadBuffer>,
}

impl Reply {
    /// Builds the reply for `outcome`, carrying `buffer` back to the caller.
    pub fn from_outcome(outcome: Outcome, buffer: Option<PayloadBuffer>) -> Self {
        let (status, soft_flag, code) = match outcome.kind {
            OutcomeKind::Success => (CallStatus::Success, None, ReturnCode::SUCCESS),
            OutcomeKind::SoftTimeout => (CallStatus::Fail, Some(SoftFlag::Timeout), ReturnCode::TIMEOUT),
            OutcomeKind::SoftNotFound => (CallStatus::Fail, Some(SoftFlag::NotFound), ReturnCode::NOT_FOUND),
            OutcomeKind::GenericFailure => (CallStatus::Fail, None, ReturnCode::SERVICE_FAILURE),
        };
        Self {
            status,
            soft_flag,
            code,
            message: outcome.message,
            buffer,
        }
    }

    /// Call status.
    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Retry hint, set only on soft failures.
    pub fn soft_flag(&self) -> Option<SoftFlag> {
        self.soft_flag
    }

    /// Canonical return code.
    pub fn code(&self) -> ReturnCode {
        self.code
    }

    /// Message for the caller's diagnostics.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Reply payload.
    pub fn buffer(&self) -> Option<&PayloadBuffer> {
        self.buffer.as_ref()
    }
}
