//! restout dispatcher: execution slots and the per-call state machine.
//!
//! This crate serves inbound bus calls against REST backends. Each call is
//! leased an execution slot from a fixed-size [`SlotPool`], walked through the
//! [`Dispatcher`] state machine, answered on the bus, and only then handed
//! back to the pool.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The dispatcher sequences calls between the
//! business logic in the [`gateway`] crate and the infrastructure traits
//! ([`gateway::HttpExchange`], [`gateway::CallBus`]). It contains no
//! error-mapping rules of its own.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`context`] | `CallContext` and `DispatchState` |
//! | [`pool`] | `SlotPool` and `SlotLease` |
//! | [`dispatcher`] | `Dispatcher` |
//! | [`errors`] | `SlotError` |

pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod pool;

pub use context::{CallContext, DispatchState};
pub use dispatcher::{Dispatcher, OPERATOR_TARGET};
pub use errors::SlotError;
pub use pool::{SlotLease, SlotPool};
