//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing a stream handle with a connection id
//! or a message id at compile time. Counter-based ids are process-wide
//! and strictly increasing.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Counter Ids
// ============================================================================

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $prefix:literal) => {
        static $counter: AtomicU64 = AtomicU64::new(1);

        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Allocates the next id.
            #[inline]
            #[must_use]
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

counter_id!(
    /// Identifier of a message held by the ledger.
    MessageId,
    NEXT_MESSAGE_ID,
    "msg"
);

counter_id!(
    /// Identifier of one opened stream handle.
    ///
    /// Every `start_stream` allocates a new handle; events tagged with an
    /// older handle are stale.
    HandleId,
    NEXT_HANDLE_ID,
    "handle"
);

counter_id!(
    /// Identifier of one duplex connection attempt.
    ConnectionId,
    NEXT_CONNECTION_ID,
    "conn"
);

// ============================================================================
// SessionId
// ============================================================================

/// Identifier of a session manager instance, used in exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a random session id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Tests
// ============================================================================
