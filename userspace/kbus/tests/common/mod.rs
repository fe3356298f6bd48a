// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Test double for the connection layer.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kbus::{Connection, Credentials, Endpoint, Notification, Result};
use parking_lot::Mutex;

/// Records every delivered notification and every disconnect call.
pub struct RecordingConnection {
    id: u64,
    creds: Credentials,
    flags: u64,
    inbox: Mutex<Vec<Notification>>,
    disconnects: AtomicUsize,
    observed: Mutex<Option<Endpoint>>,
    seen_disconnected: Mutex<Option<bool>>,
}

impl RecordingConnection {
    pub fn new(id: u64, uid: u32, gid: u32) -> Arc<Self> {
        Self::with_flags(id, uid, gid, 0)
    }

    pub fn with_flags(id: u64, uid: u32, gid: u32, flags: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            creds: Credentials::new(uid, gid),
            flags,
            inbox: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            observed: Mutex::new(None),
            seen_disconnected: Mutex::new(None),
        })
    }

    /// On disconnect, records whether `endpoint` already reported itself disconnected.
    pub fn observe(&self, endpoint: &Endpoint) {
        *self.observed.lock() = Some(endpoint.clone());
    }

    pub fn inbox(&self) -> Vec<Notification> {
        self.inbox.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn endpoint_was_disconnected(&self) -> Option<bool> {
        *self.seen_disconnected.lock()
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn credentials(&self) -> Credentials {
        self.creds
    }

    fn flags(&self) -> u64 {
        self.flags
    }

    fn deliver(&self, notification: &Notification) -> Result<()> {
        self.inbox.lock().push(notification.clone());
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(endpoint) = self.observed.lock().take() {
            *self.seen_disconnected.lock() = Some(endpoint.is_disconnected());
        }
    }
}
