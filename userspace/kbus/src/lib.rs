// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Message-bus transport core (domains, buses, endpoints, kernel notifications)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + `tests/lifecycle.rs`, `tests/notify_flush.rs`
//!
//! PUBLIC API:
//!   - Domain: root namespace, owns buses and the minor-id allocator
//!   - Bus: endpoint list, endpoint id sequence, pending-notification queue
//!   - Endpoint: reference-counted, policy-gated attachment point for connections
//!   - Connection: trait implemented by the (external) connection layer
//!   - Notification / Event: kernel-generated lifecycle messages
//!   - NodeRegistry: device-node surface (`<root>/<domain>/<bus>/<endpoint>`)
//!   - PolicyTable + item stream codec: endpoint policy gate
//!
//! LOCKING:
//!   - Domain: id allocator lock; bus list lock
//!   - Bus: structural lock (endpoints, id sequence, disconnected), notification lock
//!     (queue only), flush lock (serialises flushes)
//!   - Endpoint: connection list + disconnected flag
//!   - No lock is held while calling into `Connection` code
//!
//! DEPENDENCIES:
//!   - parking_lot::Mutex: all locks
//!   - once_cell::sync::OnceCell: ids assigned exactly once
//!   - log: lifecycle diagnostics

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod bus;
mod connection;
mod domain;
mod endpoint;
mod idr;
mod node;
mod notify;
pub mod policy;

pub use bus::Bus;
pub use connection::{Connection, Credentials};
pub use domain::Domain;
pub use endpoint::{Endpoint, NodeAccess};
pub use idr::IdAllocator;
pub use node::{MemoryNodeRegistry, NodeHandle, NodePath, NodeRecord, NodeRegistry};
pub use notify::{Destination, Event, IdChange, NameChange, Notification, NotificationType, KERNEL_SOURCE_ID};
pub use policy::{Access, PolicyEntry, PolicyRule, PolicyTable, Subject};

/// Result alias for bus operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by the bus core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An object with the same name already exists.
    #[error("name already in use")]
    AlreadyExists,
    /// The operation raced a teardown of the containing object.
    #[error("object is shutting down")]
    ShuttingDown,
    /// The id space or a bounded queue is full.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// The endpoint was created without a policy table.
    #[error("operation not supported by this endpoint")]
    NotSupported,
    /// Malformed input (policy item stream, object name).
    #[error("invalid argument")]
    InvalidArgument,
    /// Access denied by mode bits or object state.
    #[error("permission denied")]
    PermissionDenied,
    /// The object has other live users.
    #[error("object busy")]
    Busy,
    /// Access outside the valid range.
    #[error("out of range")]
    OutOfRange,
    /// The requested state change would be a no-op.
    #[error("requested state already in effect")]
    AlreadyDone,
}

/// Tunables shared by every object in a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Upper bound on concurrently allocated minor ids.
    pub max_ids: u32,
    /// Upper bound on queued, not yet flushed notifications per bus.
    pub max_pending_notifications: usize,
    /// Longest accepted bus or endpoint name, in bytes.
    pub max_name_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_ids: 1 << 20, max_pending_notifications: 4096, max_name_len: 63 }
    }
}

/// Checks a bus or endpoint name: non-empty, at most `limits.max_name_len`
/// bytes, `[A-Za-z0-9._-]` only, and neither `.` nor `..`.
pub fn validate_name(name: &str, limits: &Limits) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= limits.max_name_len
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        && name != "."
        && name != "..";
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        let limits = Limits::default();
        assert!(validate_name("ep0", &limits).is_ok());
        assert!(validate_name("1000-custom.ep_x", &limits).is_ok());
        assert_eq!(validate_name("", &limits), Err(Error::InvalidArgument));
        assert_eq!(validate_name("a/b", &limits), Err(Error::InvalidArgument));
        assert_eq!(validate_name("..", &limits), Err(Error::InvalidArgument));
        assert_eq!(validate_name(&"x".repeat(64), &limits), Err(Error::InvalidArgument));
    }
}
