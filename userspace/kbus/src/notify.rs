// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel-generated notifications (reply and ownership/lifecycle events)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + `tests/notify_flush.rs`
//!
//! Producers append to the bus queue under the notification lock only, so they
//! never contend with endpoint creation or teardown. Enqueueing is best effort:
//! a full queue is reported to the caller and logged, but the state change that
//! triggered the notification stands.

use std::collections::VecDeque;

use log::warn;

use crate::{Bus, Error, Result};

/// Source id stamped on every kernel-generated message.
pub const KERNEL_SOURCE_ID: u64 = 0;

/// Where a notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A single connection.
    Connection(u64),
    /// Every connection on the bus.
    Broadcast,
}

/// Discriminant of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    /// A method call did not receive its reply in time.
    ReplyTimeout,
    /// The peer expected to reply went away.
    ReplyDead,
    /// A well-known name gained its first owner.
    NameAdded,
    /// A well-known name moved to another owner.
    NameChanged,
    /// A well-known name lost its last owner.
    NameRemoved,
    /// A connection appeared.
    IdAdded,
    /// A connection went away.
    IdRemoved,
}

/// Payload of the name events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameChange {
    /// Previous owner id (0 when none).
    pub old_id: u64,
    /// New owner id (0 when none).
    pub new_id: u64,
    /// Previous owner's flags.
    pub old_flags: u64,
    /// New owner's flags.
    pub new_flags: u64,
    /// The well-known name.
    pub name: String,
}

/// Payload of the id events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdChange {
    /// Connection id.
    pub id: u64,
    /// Connection flags.
    pub flags: u64,
}

/// Event carried by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// See [`NotificationType::ReplyTimeout`].
    ReplyTimeout {
        /// Cookie of the unanswered call.
        cookie: u64,
    },
    /// See [`NotificationType::ReplyDead`].
    ReplyDead {
        /// Cookie of the unanswered call.
        cookie: u64,
    },
    /// See [`NotificationType::NameAdded`].
    NameAdded(NameChange),
    /// See [`NotificationType::NameChanged`].
    NameChanged(NameChange),
    /// See [`NotificationType::NameRemoved`].
    NameRemoved(NameChange),
    /// See [`NotificationType::IdAdded`].
    IdAdded(IdChange),
    /// See [`NotificationType::IdRemoved`].
    IdRemoved(IdChange),
}

impl Event {
    /// Returns the discriminant.
    pub fn kind(&self) -> NotificationType {
        match self {
            Self::ReplyTimeout { .. } => NotificationType::ReplyTimeout,
            Self::ReplyDead { .. } => NotificationType::ReplyDead,
            Self::NameAdded(_) => NotificationType::NameAdded,
            Self::NameChanged(_) => NotificationType::NameChanged,
            Self::NameRemoved(_) => NotificationType::NameRemoved,
            Self::IdAdded(_) => NotificationType::IdAdded,
            Self::IdRemoved(_) => NotificationType::IdRemoved,
        }
    }
}

/// A queued kernel message. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    seq: u64,
    destination: Destination,
    event: Event,
}

impl Notification {
    /// Bus-wide sequence number assigned at enqueue time.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Always [`KERNEL_SOURCE_ID`].
    pub fn source(&self) -> u64 {
        KERNEL_SOURCE_ID
    }

    /// Delivery target.
    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Event payload.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Event discriminant.
    pub fn kind(&self) -> NotificationType {
        self.event.kind()
    }
}

/// Pending-notification FIFO guarded by the bus notification lock.
#[derive(Debug, Default)]
pub(crate) struct NotifyQueue {
    pub(crate) pending: VecDeque<Notification>,
    last_seq: u64,
}

impl NotifyQueue {
    fn push(&mut self, limit: usize, destination: Destination, event: Event) -> Result<u64> {
        if self.pending.len() >= limit {
            return Err(Error::ResourceExhausted);
        }
        self.last_seq += 1;
        self.pending.push_back(Notification { seq: self.last_seq, destination, event });
        Ok(self.last_seq)
    }
}

impl Bus {
    /// Unicast: the call identified by `cookie` timed out waiting for its reply.
    pub fn reply_timeout(&self, dest_id: u64, cookie: u64) -> Result<u64> {
        self.enqueue(Destination::Connection(dest_id), Event::ReplyTimeout { cookie })
    }

    /// Unicast: the peer expected to answer `cookie` disconnected.
    pub fn reply_dead(&self, dest_id: u64, cookie: u64) -> Result<u64> {
        self.enqueue(Destination::Connection(dest_id), Event::ReplyDead { cookie })
    }

    /// Broadcast: `name` acquired its first owner.
    pub fn name_added(&self, old_id: u64, new_id: u64, old_flags: u64, new_flags: u64, name: &str) -> Result<u64> {
        let change = NameChange { old_id, new_id, old_flags, new_flags, name: name.to_owned() };
        self.enqueue(Destination::Broadcast, Event::NameAdded(change))
    }

    /// Broadcast: ownership of `name` moved from `old_id` to `new_id`.
    pub fn name_changed(&self, old_id: u64, new_id: u64, old_flags: u64, new_flags: u64, name: &str) -> Result<u64> {
        let change = NameChange { old_id, new_id, old_flags, new_flags, name: name.to_owned() };
        self.enqueue(Destination::Broadcast, Event::NameChanged(change))
    }

    /// Broadcast: `name` lost its last owner.
    pub fn name_removed(&self, old_id: u64, new_id: u64, old_flags: u64, new_flags: u64, name: &str) -> Result<u64> {
        let change = NameChange { old_id, new_id, old_flags, new_flags, name: name.to_owned() };
        self.enqueue(Destination::Broadcast, Event::NameRemoved(change))
    }

    /// Broadcast: connection `id` appeared.
    pub fn id_added(&self, id: u64, flags: u64) -> Result<u64> {
        self.enqueue(Destination::Broadcast, Event::IdAdded(IdChange { id, flags }))
    }

    /// Broadcast: connection `id` went away.
    pub fn id_removed(&self, id: u64, flags: u64) -> Result<u64> {
        self.enqueue(Destination::Broadcast, Event::IdRemoved(IdChange { id, flags }))
    }

    /// Number of queued, not yet flushed notifications.
    pub fn pending_notifications(&self) -> usize {
        self.inner.notify.lock().pending.len()
    }

    fn enqueue(&self, destination: Destination, event: Event) -> Result<u64> {
        let kind = event.kind();
        let limit = self.inner.limits.max_pending_notifications;
        let result = self.inner.notify.lock().push(limit, destination, event);
        if let Err(err) = result {
            warn!("kbus: bus {} dropped {:?} notification: {}", self.name(), kind, err);
        }
        result
    }
}
