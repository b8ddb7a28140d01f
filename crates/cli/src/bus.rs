//! In-process bus used by the `call` command.
//!
//! Serves exactly the payload given on the command line and keeps the reply
//! the dispatcher commits so the command can print it.

use std::sync::Mutex;

use async_trait::async_trait;
use gateway::{BusError, CallBus, InboundCall, PayloadBuffer, Reply, SlotId};

/// A [`CallBus`] that answers every bind with one fixed request payload.
#[derive(Debug)]
pub struct SingleShotBus {
    request: PayloadBuffer,
    reply: Mutex<Option<Reply>>,
}

impl SingleShotBus {
    /// Creates a bus that will serve `request`.
    pub fn new(request: PayloadBuffer) -> Self {
        Self {
            request,
            reply: Mutex::new(None),
        }
    }

    /// Takes the committed reply, if one has arrived.
    pub fn take_reply(&self) -> Option<Reply> {
        self.reply.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl CallBus for SingleShotBus {
    async fn bind_inbound_call(&self, slot: SlotId, call: &InboundCall) -> Result<PayloadBuffer, BusError> {
        tracing::debug!(%slot, descriptor = %call.descriptor, "Binding command-line payload");
        Ok(self.request.clone())
    }

    async fn respond_to_caller(&self, _slot: SlotId, _call: &InboundCall, reply: Reply) -> Result<(), BusError> {
        let mut slot = self
            .reply
            .lock()
            .map_err(|_| BusError::Respond("reply slot poisoned".to_string()))?;
        *slot = Some(reply);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use gateway::{CallDescriptor, Outcome, OutcomeKind, ServiceName};

    use super::*;

    fn call() -> InboundCall {
        InboundCall {
            service: ServiceName::new("ECHO").unwrap(),
            descriptor: CallDescriptor::new(1),
        }
    }

    #[tokio::test]
    async fn test_bind_serves_the_fixed_payload() {
        let bus = SingleShotBus::new(PayloadBuffer::PlainString("ping".into()));
        let payload = bus.bind_inbound_call(SlotId::new(0), &call()).await.unwrap();
        assert_eq!(payload, PayloadBuffer::PlainString("ping".into()));
    }

    #[tokio::test]
    async fn test_reply_is_kept_until_taken() {
        let bus = SingleShotBus::new(PayloadBuffer::PlainString("ping".into()));
        assert!(bus.take_reply().is_none());

        let reply = Reply::from_outcome(Outcome::new(OutcomeKind::Success, ""), None);
        bus.respond_to_caller(SlotId::new(0), &call(), reply.clone()).await.unwrap();

        assert_eq!(bus.take_reply(), Some(reply));
        assert!(bus.take_reply().is_none());
    }

    #[test]
    fn test_default_grow_rejects_oversized_payloads() {
        let bus = SingleShotBus::new(PayloadBuffer::PlainString("ping".into()));
        let mut payload = PayloadBuffer::PlainString("x".repeat(10));
        assert!(bus.grow_buffer(&mut payload, 100).is_ok());
        assert!(matches!(bus.grow_buffer(&mut payload, 4), Err(BusError::Grow { .. })));
    }
}
