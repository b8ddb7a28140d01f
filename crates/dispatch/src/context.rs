//! Per-slot execution context.
//!
//! A [`CallContext`] is created once per pool slot and reused for every call
//! the slot serves. [`CallContext::bind`] attaches a call to it and
//! [`CallContext::reset`] clears it again; binding an already-bound context or
//! moving the dispatch state backwards is reported as a [`SlotError`] rather
//! than silently corrupting the context.

use gateway::{CallId, InboundCall, SlotId, Timestamp};
use tracing::Span;

use crate::SlotError;

/// Progress of one dispatch through its slot.
///
/// States only ever move forward. Early failures skip straight to
/// [`DispatchState::ReplyBuilt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DispatchState {
    /// Not serving a call.
    Idle,
    /// Leased from the pool and bound to a call.
    Leased,
    /// Service and buffer format resolved; payload serialized.
    TypeResolved,
    /// Exchange finished (with a response or a transport failure).
    Sent,
    /// Response classified into an outcome.
    ResponseClassified,
    /// Reply payload decided.
    ReplyBuilt,
    /// Reply committed; the slot is on its way back to the pool.
    Released,
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
struct ActiveCall {
    call_id: CallId,
    call: InboundCall,
    leased_at: Timestamp,
    state: DispatchState,
}

/// Mutable state of one execution slot.
#[derive(Debug)]
pub struct CallContext {
    slot: SlotId,
    active: Option<ActiveCall>,
    calls_served: u64,
}

impl CallContext {
    /// Creates an idle context for `slot`.
    pub fn new(slot: SlotId) -> Self {
        Self {
            slot,
            active: None,
            calls_served: 0,
        }
    }

    /// The slot this context belongs to.
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Attaches `call` to this context and opens its logging scope.
    ///
    /// # Errors
    ///
    /// [`SlotError::AlreadyBound`] if the context is still serving a call.
    pub fn bind(&mut self, call: InboundCall) -> Result<Span, SlotError> {
        if let Some(active) = &self.active {
            return Err(SlotError::AlreadyBound {
                slot: self.slot,
                call_id: active.call_id,
            });
        }
        let call_id = CallId::new_random();
        let span = tracing::info_span!(
            "dispatch",
            slot = %self.slot,
            service = %call.service,
            descriptor = %call.descriptor,
            call_id = %call_id,
        );
        self.active = Some(ActiveCall {
            call_id,
            call,
            leased_at: Timestamp::now(),
            state: DispatchState::Leased,
        });
        Ok(span)
    }

    /// Moves the bound call to `next`.
    ///
    /// # Errors
    ///
    /// [`SlotError::NotBound`] if no call is bound, or
    /// [`SlotError::InvalidTransition`] if `next` is not after the current state.
    pub fn advance(&mut self, next: DispatchState) -> Result<(), SlotError> {
        let slot = self.slot;
        let active = self.active.as_mut().ok_or(SlotError::NotBound { slot })?;
        if next <= active.state {
            return Err(SlotError::InvalidTransition {
                slot,
                from: active.state,
                to: next,
            });
        }
        tracing::trace!(from = %active.state, to = %next, "Dispatch state change");
        active.state = next;
        Ok(())
    }

    /// Current dispatch state; [`DispatchState::Idle`] when unbound.
    pub fn state(&self) -> DispatchState {
        self.active.as_ref().map_or(DispatchState::Idle, |a| a.state)
    }

    /// Returns `true` while a call is bound.
    pub fn is_bound(&self) -> bool {
        self.active.is_some()
    }

    /// The bound call, if any.
    pub fn call(&self) -> Option<&InboundCall> {
        self.active.as_ref().map(|a| &a.call)
    }

    /// Correlation id of the bound call, if any.
    pub fn call_id(&self) -> Option<CallId> {
        self.active.as_ref().map(|a| a.call_id)
    }

    /// When the bound call was attached, if any.
    pub fn leased_at(&self) -> Option<Timestamp> {
        self.active.as_ref().map(|a| a.leased_at)
    }

    /// Number of calls this context has completed.
    pub fn calls_served(&self) -> u64 {
        self.calls_served
    }

    /// Clears the per-call state so the context can serve another call.
    pub fn reset(&mut self) {
        if self.active.take().is_some() {
            self.calls_served += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use gateway::{CallDescriptor, ServiceName};

    use super::*;

    fn call() -> InboundCall {
        InboundCall {
            service: ServiceName::new("ECHO").unwrap(),
            descriptor: CallDescriptor::new(7),
        }
    }

    #[test]
    fn test_bind_reset_lifecycle() {
        let mut ctx = CallContext::new(SlotId::new(0));
        assert_eq!(ctx.state(), DispatchState::Idle);

        ctx.bind(call()).unwrap();
        assert!(ctx.is_bound());
        assert_eq!(ctx.state(), DispatchState::Leased);
        assert_eq!(ctx.call(), Some(&call()));
        assert!(ctx.call_id().is_some());
        assert!(ctx.leased_at().is_some());

        ctx.reset();
        assert!(!ctx.is_bound());
        assert_eq!(ctx.calls_served(), 1);
        assert!(ctx.call().is_none());
    }

    #[test]
    fn test_double_bind_is_rejected() {
        let mut ctx = CallContext::new(SlotId::new(1));
        ctx.bind(call()).unwrap();
        assert!(matches!(ctx.bind(call()), Err(SlotError::AlreadyBound { .. })));
    }

    #[test]
    fn test_each_bind_gets_a_fresh_call_id() {
        let mut ctx = CallContext::new(SlotId::new(0));
        ctx.bind(call()).unwrap();
        let first = ctx.call_id();
        ctx.reset();
        ctx.bind(call()).unwrap();
        assert_ne!(first, ctx.call_id());
    }

    #[test]
    fn test_states_only_move_forward() {
        let mut ctx = CallContext::new(SlotId::new(0));
        assert!(matches!(
            ctx.advance(DispatchState::Sent),
            Err(SlotError::NotBound { .. })
        ));

        ctx.bind(call()).unwrap();
        ctx.advance(DispatchState::TypeResolved).unwrap();
        ctx.advance(DispatchState::ReplyBuilt).unwrap();
        assert!(matches!(
            ctx.advance(DispatchState::Sent),
            Err(SlotError::InvalidTransition {
                from: DispatchState::ReplyBuilt,
                to: DispatchState::Sent,
                ..
            })
        ));
        assert!(ctx.advance(DispatchState::ReplyBuilt).is_err());
        ctx.advance(DispatchState::Released).unwrap();
    }

    #[test]
    fn test_reset_of_idle_context_does_not_count() {
        let mut ctx = CallContext::new(SlotId::new(0));
        ctx.reset();
        assert_eq!(ctx.calls_served(), 0);
    }
}
