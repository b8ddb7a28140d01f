//! Core domain for the restout gateway.
//!
//! This crate contains every domain concept of the outbound REST gateway: the
//! typed payload buffers crossing the bus boundary, the per-service
//! configuration, the five error-mapping conventions, the outcome normalizer,
//! and the port traits that infrastructure crates implement.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ServiceName`, `SlotId`, `CallId`, etc.) |
//! | [`types`] | Shared value types (`ReturnCode`, `CodeVocabulary`, `ContentType`, `Timestamp`) |
//! | [`buffer`] | `PayloadBuffer`, record types, and the buffer adapter |
//! | [`config`] | `ServiceConfig`, the raw configuration model, and `ServiceRegistry` |
//! | [`mapping`] | Error-mapping policy (`extract`, `status_override`) |
//! | [`outcome`] | Outcome normalizer and the bus reply vocabulary |
//! | [`ports`] | `HttpExchange` and `CallBus` traits |
//! | [`errors`] | Error taxonomy |

pub mod buffer;
pub mod config;
pub mod errors;
pub mod identifiers;
pub mod mapping;
pub mod outcome;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use buffer::{BufferFormat, FieldSet, FieldValue, PayloadBuffer, StructuredRecord, ViewRecord};
pub use config::{
    CodeDefinition, ErrorMode, ErrorPolicy, GatewayConfig, ServiceConfig, ServiceDefinition,
    ServiceRegistry, StatusTable,
};
pub use errors::{BusError, ConfigError, FormatError, GatewayError, TransportError};
pub use identifiers::{CallDescriptor, CallId, FieldName, ServiceName, SlotId};
pub use mapping::{ErrorEnvelope, Extraction, JsonField};
pub use outcome::{normalize, CallStatus, Outcome, OutcomeKind, Reply, SoftFlag};
pub use ports::{CallBus, ExchangeRequest, ExchangeResponse, ExchangeResult, HttpExchange, InboundCall};
pub use types::{CodeVocabulary, ContentType, ReturnCode, Timestamp};
