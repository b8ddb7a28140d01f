//! restout HTTP infrastructure adapter.
//!
//! Implements [`gateway::HttpExchange`] on top of [`reqwest`]. Every request
//! goes out on a fresh connection (no idle pooling, `Connection: close`) with
//! the service's timeout applied to the whole exchange.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. It turns a
//! [`gateway::ExchangeRequest`] into one HTTP POST and reports what happened;
//! classifying the response is the dispatcher's job.

pub mod errors;
pub mod exchange;

pub use errors::BackendError;
pub use exchange::ReqwestExchange;
