//! Fixed-size pool of execution slots.
//!
//! Free contexts travel through a bounded FIFO channel: leasing is a
//! receive, releasing is a send. A context is owned by exactly one
//! [`SlotLease`] while it is out of the channel, so no other synchronisation
//! is needed. When every slot is leased, [`SlotPool::lease`] waits, which caps
//! the number of concurrent backend calls at the pool size.
//!
//! A lease goes back to the queue only through [`SlotLease::release`] (or,
//! as a last resort, when the lease is dropped). The dispatcher calls
//! `release` only after the bus has accepted the reply.

use std::sync::Arc;

use gateway::SlotId;
use tokio::sync::{mpsc, Mutex};

use crate::{CallContext, DispatchState, SlotError};

#[derive(Debug)]
struct FreeQueue {
    sender: mpsc::Sender<CallContext>,
    receiver: Mutex<mpsc::Receiver<CallContext>>,
}

impl FreeQueue {
    fn push(&self, mut context: CallContext) {
        let slot = context.slot();
        context.reset();
        // Capacity equals the number of contexts in existence, so this can
        // only fail if a context was duplicated.
        if let Err(e) = self.sender.try_send(context) {
            tracing::error!(%slot, error = %e, "Failed to return slot to the free queue");
        }
    }
}

/// Bounded set of reusable [`CallContext`]s.
#[derive(Debug, Clone)]
pub struct SlotPool {
    queue: Arc<FreeQueue>,
    size: usize,
}

impl SlotPool {
    /// Creates a pool with `size` idle slots, numbered `0..size`.
    ///
    /// # Errors
    ///
    /// [`SlotError::EmptyPool`] if `size` is zero.
    pub fn new(size: usize) -> Result<Self, SlotError> {
        if size == 0 {
            return Err(SlotError::EmptyPool);
        }
        let (sender, receiver) = mpsc::channel(size);
        for index in 0..size {
            sender
                .try_send(CallContext::new(SlotId::new(index)))
                .map_err(|_| SlotError::PoolClosed)?;
        }
        tracing::debug!(size, "Execution-slot pool initialised");
        Ok(Self {
            queue: Arc::new(FreeQueue {
                sender,
                receiver: Mutex::new(receiver),
            }),
            size,
        })
    }

    /// Waits for a free slot and takes ownership of its context.
    ///
    /// Waiters are served in arrival order.
    pub async fn lease(&self) -> Result<SlotLease, SlotError> {
        let context = {
            let mut receiver = self.queue.receiver.lock().await;
            receiver.recv().await.ok_or(SlotError::PoolClosed)?
        };
        tracing::debug!(slot = %context.slot(), "Slot leased");
        Ok(SlotLease {
            context,
            queue: Arc::clone(&self.queue),
            returned: false,
        })
    }

    /// Total number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots currently waiting in the free queue.
    pub fn idle_slots(&self) -> usize {
        self.queue.sender.max_capacity() - self.queue.sender.capacity()
    }
}

/// Exclusive ownership of one execution slot.
#[derive(Debug)]
pub struct SlotLease {
    context: CallContext,
    queue: Arc<FreeQueue>,
    returned: bool,
}

impl SlotLease {
    /// The leased slot.
    pub fn slot(&self) -> SlotId {
        self.context.slot()
    }

    /// The slot's context.
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// The slot's context, mutably.
    pub fn context_mut(&mut self) -> &mut CallContext {
        &mut self.context
    }

    /// Marks the dispatch released, clears the context, and returns the slot
    /// to the pool.
    ///
    /// Must only be called once the reply has been committed to the bus.
    pub fn release(mut self) {
        if self.context.is_bound() {
            if let Err(e) = self.context.advance(DispatchState::Released) {
                tracing::warn!(error = %e, "Releasing slot from an unexpected state");
            }
        }
        match self.context.leased_at() {
            Some(leased_at) => tracing::debug!(
                slot = %self.slot(),
                %leased_at,
                held_ms = leased_at.elapsed_ms(),
                calls_served = self.context.calls_served(),
                "Slot released"
            ),
            None => tracing::debug!(slot = %self.slot(), "Slot released"),
        }
        self.give_back();
    }

    fn give_back(&mut self) {
        let slot = self.context.slot();
        let context = std::mem::replace(&mut self.context, CallContext::new(slot));
        self.returned = true;
        self.queue.push(context);
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if !self.returned {
            tracing::warn!(
                slot = %self.context.slot(),
                state = %self.context.state(),
                "Slot lease dropped without release; returning slot to the pool"
            );
            self.give_back();
        }
    }
}
