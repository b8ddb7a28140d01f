//! Port traits implemented by infrastructure crates.
//!
//! The dispatcher depends only on these traits:
//!
//! - [`HttpExchange`] issues the outbound POST. Implemented by the `backend`
//!   crate over reqwest.
//! - [`CallBus`] is the transaction-processing bus: it binds inbound call
//!   payloads to execution slots and accepts replies. Implemented by whatever
//!   hosts the gateway (the CLI ships a single-shot implementation).

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    BusError, CallDescriptor, ContentType, FormatError, PayloadBuffer, Reply, ServiceName, SlotId,
    TransportError,
};

// ---------------------------------------------------------------------------
// HTTP exchange
// ---------------------------------------------------------------------------

/// One outbound POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Backend endpoint.
    pub url: String,
    /// Serialized payload.
    pub body: Vec<u8>,
    /// `Content-Type` header value.
    pub content_type: ContentType,
    /// Upper bound on the whole exchange, body included.
    pub timeout: Duration,
    /// Skip TLS certificate verification.
    pub ssl_insecure: bool,
    /// Largest body worth keeping. Implementations may stop reading one byte
    /// past this limit; [`ExchangeResponse::body_within`] then rejects it.
    pub max_body_size: usize,
}

/// A complete HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl ExchangeResponse {
    /// Returns the body if it fits in `max_size` bytes.
    pub fn body_within(&self, max_size: usize) -> Result<&[u8], FormatError> {
        if self.body.len() > max_size {
            Err(FormatError::TooLarge {
                size: self.body.len(),
                max: max_size,
            })
        } else {
            Ok(&self.body)
        }
    }
}

/// Outcome of one HTTP attempt.
pub type ExchangeResult = Result<ExchangeResponse, TransportError>;

/// Issues outbound HTTP requests.
///
/// Implementations must not reuse connections across calls and must report
/// timeouts as [`TransportError::Timeout`] so the dispatcher can tell them
/// apart from other network failures.
#[async_trait]
pub trait HttpExchange: Send + Sync {
    /// Sends `request` and reads the full response.
    async fn post(&self, request: ExchangeRequest) -> ExchangeResult;
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// An inbound call as announced by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCall {
    /// Service the call is addressed to.
    pub service: ServiceName,
    /// Bus-assigned call descriptor.
    pub descriptor: CallDescriptor,
}

/// The transaction-processing bus, seen from the gateway.
#[async_trait]
pub trait CallBus: Send + Sync {
    /// Takes ownership of the inbound payload on behalf of `slot`.
    async fn bind_inbound_call(&self, slot: SlotId, call: &InboundCall) -> Result<PayloadBuffer, BusError>;

    /// Grows `buffer` so it can hold a reply of up to `max_size` bytes.
    ///
    /// The default implementation only checks that the request itself fits.
    fn grow_buffer(&self, buffer: &mut PayloadBuffer, max_size: usize) -> Result<(), BusError> {
        let size = buffer.size();
        if size > max_size {
            Err(BusError::Grow {
                size,
                requested: max_size,
            })
        } else {
            Ok(())
        }
    }

    /// Commits the reply for the call bound to `slot`.
    ///
    /// Once this returns, the bus no longer references the slot's context.
    async fn respond_to_caller(&self, slot: SlotId, call: &InboundCall, reply: Reply) -> Result<(), BusError>;
}
