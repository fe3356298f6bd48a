// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interface boundary towards the connection layer.

use crate::{Notification, Result};

/// Identity a connection presents when attaching or asking the policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Credentials {
    /// User id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
}

impl Credentials {
    /// Creates credentials for `uid`/`gid`.
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Returns `true` for the superuser.
    pub const fn is_privileged(&self) -> bool {
        self.uid == 0
    }
}

/// A connection attached to an endpoint.
///
/// Implementations live outside this crate. The core never calls into a
/// connection while holding one of its own locks, so implementations may call
/// back into the bus (for example to emit notifications) but must not flush the
/// bus from inside [`Connection::deliver`].
pub trait Connection: Send + Sync {
    /// Connection id. Attach rejects an id already attached anywhere on the
    /// bus; [`crate::Bus::next_connection_id`] hands out fresh ones.
    fn id(&self) -> u64;

    /// Credentials checked against node mode bits and policy.
    fn credentials(&self) -> Credentials;

    /// Connection flags reported in id notifications.
    fn flags(&self) -> u64 {
        0
    }

    /// Queues a kernel notification for this connection.
    fn deliver(&self, notification: &Notification) -> Result<()>;

    /// Severs the connection. Called once, with no bus lock held.
    fn disconnect(&self);
}
