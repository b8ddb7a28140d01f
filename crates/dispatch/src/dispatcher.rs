//! The dispatch state machine for one inbound call.
//!
//! ```text
//! Leased → TypeResolved → Sent → ResponseClassified → ReplyBuilt → Released
//! ```
//!
//! Every path, including every early failure, ends with a reply committed to
//! the bus and then the slot released, in that order. Failures never escape
//! as errors: each is logged where it is detected and resolved to one of the
//! four [`OutcomeKind`]s.
//!
//! Reply payload rule: on success, or when the service sets
//! `parse_on_error`, the response body becomes the reply in the request's
//! format (reusing the record the error mode already parsed). Otherwise the
//! untouched request buffer goes back.

use std::sync::Arc;
use std::time::Instant;

use gateway::buffer;
use gateway::mapping::{self, body_snippet};
use gateway::{
    normalize, BufferFormat, CallBus, ExchangeRequest, ExchangeResponse, GatewayError,
    HttpExchange, InboundCall, Outcome, OutcomeKind, PayloadBuffer, Reply, ServiceConfig,
    ServiceRegistry,
};
use tracing::Instrument;

use crate::{CallContext, DispatchState, SlotError, SlotPool};

/// Log target for operator-actionable defects.
pub const OPERATOR_TARGET: &str = "operator";

/// Serves inbound calls against configured REST backends.
///
/// Cheap to clone; clones share the registry, the adapters, and the pool.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    exchange: Arc<dyn HttpExchange>,
    bus: Arc<dyn CallBus>,
    pool: SlotPool,
}

impl Dispatcher {
    /// Creates a dispatcher over the given collaborators.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        exchange: Arc<dyn HttpExchange>,
        bus: Arc<dyn CallBus>,
        pool: SlotPool,
    ) -> Self {
        Self {
            registry,
            exchange,
            bus,
            pool,
        }
    }

    /// Serves one call end to end and returns the outcome reported to the bus.
    ///
    /// Waits for a free slot first when the pool is saturated.
    ///
    /// # Errors
    ///
    /// Only slot lifecycle violations are errors; every call failure is
    /// reported through the returned [`Outcome`].
    pub async fn dispatch(&self, call: InboundCall) -> Result<Outcome, SlotError> {
        let mut lease = self.pool.lease().await?;
        let span = lease.context_mut().bind(call.clone())?;
        let slot = lease.slot();

        let outcome = async move {
            tracing::info!("Dispatching call");
            let (outcome, buffer) = self.serve(lease.context_mut(), &call).await;
            step(lease.context_mut(), DispatchState::ReplyBuilt);

            if outcome.kind.is_success() {
                tracing::info!("Dispatch returns success");
            } else {
                tracing::warn!(outcome = %outcome.kind, message = ?outcome.message, "Dispatch returns failure");
            }

            let reply = Reply::from_outcome(outcome.clone(), buffer);
            if let Err(e) = self.bus.respond_to_caller(slot, &call, reply).await {
                tracing::error!(error = %e, "Failed to deliver reply to caller");
            }

            // The bus no longer references the context; only now may another
            // dispatch pick up this slot.
            lease.release();
            outcome
        }
        .instrument(span)
        .await;

        Ok(outcome)
    }

    async fn serve(&self, ctx: &mut CallContext, call: &InboundCall) -> (Outcome, Option<PayloadBuffer>) {
        let request = match self.bus.bind_inbound_call(ctx.slot(), call).await {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::error!(error = %e, "Failed to bind inbound call");
                return (Outcome::new(OutcomeKind::GenericFailure, e.to_string()), None);
            }
        };

        let Some(service) = self.registry.lookup(&call.service) else {
            let err = GatewayError::Configuration {
                service: call.service.to_string(),
                message: "no such service is configured".to_string(),
            };
            tracing::error!(target: OPERATOR_TARGET, "{err}");
            return (failure(&err), Some(request));
        };

        let (outcome, reply) = self.process(ctx, &service, request).await;
        (outcome, Some(reply))
    }

    async fn process(
        &self,
        ctx: &mut CallContext,
        service: &ServiceConfig,
        mut request: PayloadBuffer,
    ) -> (Outcome, PayloadBuffer) {
        if let Err(e) = self.bus.grow_buffer(&mut request, service.max_message_size) {
            tracing::error!(error = %e, "Failed to grow request buffer");
            return (Outcome::new(OutcomeKind::GenericFailure, e.to_string()), request);
        }

        let format = request.format();
        let mode = service.error_mode();
        if !format.supports(mode) {
            let err = GatewayError::incompatible(service.name.as_str(), format, mode);
            tracing::error!(target: OPERATOR_TARGET, %format, %mode, "{err}");
            return (failure(&err), request);
        }

        let (body, content_type) = match buffer::serialize(&request) {
            Ok(wire) => wire,
            Err(e) => {
                let err = GatewayError::Configuration {
                    service: service.name.to_string(),
                    message: format!("request payload cannot be serialized: {e}"),
                };
                tracing::error!(target: OPERATOR_TARGET, "{err}");
                return (failure(&err), request);
            }
        };
        step(ctx, DispatchState::TypeResolved);

        tracing::debug!(%format, len = body.len(), body = %body_snippet(&body), "Data to send");
        tracing::info!(url = %service.url, ssl_insecure = service.ssl_insecure, "Sending POST request");

        let started = Instant::now();
        let result = self
            .exchange
            .post(ExchangeRequest {
                url: service.url.clone(),
                body,
                content_type,
                timeout: service.timeout,
                ssl_insecure: service.ssl_insecure,
                max_body_size: service.max_message_size,
            })
            .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        step(ctx, DispatchState::Sent);

        let response = match result {
            Ok(response) => {
                tracing::info!(status = response.status, elapsed_ms, "Response status");
                response
            }
            Err(e) => {
                tracing::error!(error = %e, elapsed_ms, "HTTP exchange failed");
                step(ctx, DispatchState::ResponseClassified);
                return (Outcome::new(e.outcome_kind(), e.to_string()), request);
            }
        };
        tracing::debug!(body = %body_snippet(&response.body), "Got response back");

        let classified = classify(service, &response);
        step(ctx, DispatchState::ResponseClassified);

        match classified {
            Ok(classification) => build_reply(service, format, &response, classification, request),
            Err(e) => {
                tracing::error!(
                    status = response.status,
                    body = %body_snippet(&response.body),
                    error = %e,
                    "Failed to interpret response - responding with soft timeout"
                );
                (failure(&e), request)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Classification and reply construction
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Classification {
    outcome: Outcome,
    parsed_reply: Option<PayloadBuffer>,
    /// `false` when a status override failed the call before the body was read.
    body_usable: bool,
}

fn classify(service: &ServiceConfig, response: &ExchangeResponse) -> Result<Classification, GatewayError> {
    if let Some(code) = mapping::status_override(service.error_mode(), &service.status_table, response.status) {
        let kind = normalize(Some(code), service.codes).into_failure();
        tracing::error!(
            status = response.status,
            %code,
            body = %body_snippet(&response.body),
            "Expected HTTP status 200 - applying status table"
        );
        return Ok(Classification {
            outcome: Outcome::new(kind, format!("HTTP status {}", response.status)),
            parsed_reply: None,
            body_usable: false,
        });
    }

    let extraction = mapping::extract(
        &service.error_policy,
        &service.status_table,
        response.status,
        &response.body,
    )?;
    let kind = normalize(extraction.envelope.code, service.codes);
    tracing::info!(
        code = ?extraction.envelope.code.map(|c| c.as_i64()),
        message = %extraction.envelope.message,
        outcome = %kind,
        "Status after remap"
    );

    Ok(Classification {
        outcome: Outcome::new(kind, extraction.envelope.message),
        parsed_reply: extraction.parsed_reply,
        body_usable: true,
    })
}

fn build_reply(
    service: &ServiceConfig,
    format: BufferFormat,
    response: &ExchangeResponse,
    classification: Classification,
    request: PayloadBuffer,
) -> (Outcome, PayloadBuffer) {
    let outcome = classification.outcome;
    if !classification.body_usable {
        return (outcome, request);
    }
    if !outcome.kind.is_success() && !service.parse_on_error {
        tracing::warn!("Request failed and parse_on_error is false - not changing buffer");
        return (outcome, request);
    }

    let parsed = classification.parsed_reply;
    let rebuilt = response
        .body_within(service.max_message_size)
        .and_then(|body| match parsed {
            Some(record) => Ok(record),
            None => buffer::deserialize(format, body),
        });

    match rebuilt {
        Ok(reply) => (outcome, reply),
        Err(e) => {
            tracing::error!(
                target: OPERATOR_TARGET,
                %format,
                error = %e,
                body = %body_snippet(&response.body),
                "Failed to convert response into the reply buffer - dropping"
            );
            (Outcome::new(OutcomeKind::SoftTimeout, e.to_string()), request)
        }
    }
}

fn failure(err: &GatewayError) -> Outcome {
    Outcome::new(err.outcome_kind(), err.to_string())
}

fn step(ctx: &mut CallContext, state: DispatchState) {
    if let Err(e) = ctx.advance(state) {
        tracing::error!(error = %e, "Dispatch state machine violated");
    }
}
