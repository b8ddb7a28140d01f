//! Errors raised by the execution-slot machinery.
//!
//! These indicate a broken lifecycle (a context bound twice, a state moving
//! backwards, a pool that can no longer hand out slots), never a failed call.
//! Failed calls are always answered with an [`gateway::Outcome`].

use gateway::{CallId, SlotId};
use thiserror::Error;

use crate::DispatchState;

/// Execution-slot lifecycle violation.
#[derive(Debug, Error)]
pub enum SlotError {
    /// A pool must have at least one slot.
    #[error("Slot pool size must be at least 1")]
    EmptyPool,

    /// The free-slot queue is closed; no further leases are possible.
    #[error("Slot pool is closed")]
    PoolClosed,

    /// A context was bound while still serving another call.
    #[error("Slot {slot} is still bound to call {call_id}")]
    AlreadyBound {
        /// Offending slot.
        slot: SlotId,
        /// Call currently holding the slot.
        call_id: CallId,
    },

    /// A state change was requested on an unbound context.
    #[error("Slot {slot} has no bound call")]
    NotBound {
        /// Offending slot.
        slot: SlotId,
    },

    /// A state change would move the dispatch backwards.
    #[error("Slot {slot}: invalid dispatch state change {from} -> {to}")]
    InvalidTransition {
        /// Offending slot.
        slot: SlotId,
        /// Current state.
        from: DispatchState,
        /// Requested state.
        to: DispatchState,
    },
}
