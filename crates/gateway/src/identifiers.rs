//! Newtype domain identifiers.
//!
//! Every concept that has an identity in the gateway is represented as a
//! distinct newtype wrapping a primitive. This prevents accidentally
//! interchanging, for example, a [`CallDescriptor`] assigned by the bus with a
//! [`SlotId`] assigned by the execution-slot pool even though both are plain
//! integers under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: bus-assigned integers
// ---------------------------------------------------------------------------

/// Identifies one inbound call as assigned by the bus.
///
/// The descriptor is opaque to the gateway; it is only handed back to the bus
/// when binding the call payload and for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallDescriptor(u64);

impl CallDescriptor {
    /// Creates a new descriptor from a raw integer.
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: pool-assigned indices
// ---------------------------------------------------------------------------

/// Identifies one execution slot within a fixed-size pool.
///
/// Slot identifiers are dense: a pool of `N` slots uses `0..N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(usize);

impl SlotId {
    /// Creates a slot identifier from its index in the pool.
    pub fn new(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single dispatch for log correlation.
///
/// Generated fresh every time a call is bound to an execution slot, so the
/// same slot carries a different [`CallId`] for every call it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Generates a new random call identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (configuration names)
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a logical outbound route as declared in the gateway
    /// configuration (e.g. `"GETBALANCE"`).
    ///
    /// The bus advertises one service per configured name; the name is also
    /// the key used to look up the route's [`crate::ServiceConfig`].
    ServiceName
}

string_id! {
    /// Names a field of a structured or view record (e.g. `"EX_IF_ECODE"`).
    FieldName
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_rejects_empty() {
        assert!(ServiceName::new("").is_none());
        assert_eq!(ServiceName::new("ECHO").unwrap().as_str(), "ECHO");
    }

    #[test]
    fn test_call_ids_are_unique() {
        assert_ne!(CallId::new_random(), CallId::new_random());
    }

    #[test]
    fn test_slot_id_display() {
        assert_eq!(SlotId::new(3).to_string(), "#3");
    }
}
