// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bus (named message space): endpoint list, id sequence, notification queue
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + `tests/lifecycle.rs`, `tests/notify_flush.rs`
//!
//! INVARIANTS:
//!   - Endpoint ids are assigned once, at link time, under the structural lock
//!   - A bus marked disconnected never links another endpoint
//!   - Flushes are serialised; each queued notification is handed out at most once

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::domain::DomainInner;
use crate::endpoint::EndpointInner;
use crate::notify::NotifyQueue;
use crate::{validate_name, Connection, Destination, Endpoint, Error, Event, Limits, NodeAccess, Notification, Result};

/// Handle to a bus. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct Bus {
    pub(crate) inner: Arc<BusInner>,
}

pub(crate) struct BusInner {
    name: String,
    pub(crate) limits: Limits,
    domain: Weak<DomainInner>,
    state: Mutex<BusState>,
    pub(crate) notify: Mutex<NotifyQueue>,
    flush_lock: Mutex<()>,
    conn_id_seq: AtomicU64,
}

struct BusState {
    endpoints: Vec<Endpoint>,
    endpoint_id_seq: u64,
    disconnected: bool,
}

impl Bus {
    pub(crate) fn new(name: &str, domain: &Arc<DomainInner>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name: name.to_owned(),
                limits: *domain.limits(),
                domain: Arc::downgrade(domain),
                state: Mutex::new(BusState { endpoints: Vec::new(), endpoint_id_seq: 0, disconnected: false }),
                notify: Mutex::new(NotifyQueue::default()),
                flush_lock: Mutex::new(()),
                conn_id_seq: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<BusInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn is(&self, other: &Arc<BusInner>) -> bool {
        Arc::ptr_eq(&self.inner, other)
    }

    /// Bus name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` once [`Bus::disconnect`] has started.
    pub fn is_disconnected(&self) -> bool {
        self.inner.state.lock().disconnected
    }

    /// Allocates a connection id for a connection about to attach to this bus.
    pub fn next_connection_id(&self) -> u64 {
        self.inner.conn_id_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Creates, registers and links a new endpoint.
    ///
    /// The endpoint is built and its node registered without the bus lock held;
    /// the lock is taken again only to commit. Either the endpoint is fully
    /// linked and visible, or nothing was linked and all partial state released.
    pub fn create_endpoint(&self, name: &str, access: NodeAccess, policy_enabled: bool) -> Result<Endpoint> {
        validate_name(name, &self.inner.limits)?;
        if self.lookup(name).is_some() {
            return Err(Error::AlreadyExists);
        }
        let domain = self.inner.domain.upgrade().ok_or(Error::ShuttingDown)?;

        let endpoint = Endpoint::build(&domain, &self.inner, name, access, policy_enabled);
        if let Err(err) = endpoint.register_node(&domain) {
            endpoint.disconnect();
            return Err(err);
        }

        let mut state = self.inner.state.lock();
        let verdict = if state.disconnected {
            Err(Error::ShuttingDown)
        } else if state.endpoints.iter().any(|linked| linked.name() == name && !linked.is_disconnected()) {
            Err(Error::AlreadyExists)
        } else {
            Ok(())
        };
        if let Err(err) = verdict {
            drop(state);
            endpoint.disconnect();
            return Err(err);
        }
        state.endpoint_id_seq += 1;
        endpoint.assign_id(state.endpoint_id_seq);
        state.endpoints.push(endpoint.clone());
        drop(state);

        debug!(
            "kbus: bus {} linked endpoint {} id={} minor={}",
            self.inner.name,
            name,
            endpoint.id(),
            endpoint.minor()
        );
        Ok(endpoint)
    }

    /// Looks up a live endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        self.lookup(name)
    }

    /// Snapshot of the linked endpoints, in id order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.inner.state.lock().endpoints.clone()
    }

    /// Delivers every queued notification through the default routing path.
    ///
    /// Unicast notifications go to the attached connection with the destination
    /// id (and are dropped if it is gone); broadcasts go to every connection of
    /// every linked endpoint, except that name events skip connections whose
    /// endpoint policy hides the name. Returns the number of notifications dequeued.
    pub fn flush_notifications(&self) -> usize {
        self.flush_with(|notification| self.route(notification))
    }

    /// Dequeues every queued notification and hands each, in enqueue order, to
    /// `deliver`. Concurrent flushes are serialised; producers are never blocked
    /// by delivery. Returns the number of notifications dequeued.
    pub fn flush_with<F>(&self, mut deliver: F) -> usize
    where
        F: FnMut(&Notification),
    {
        let _flush = self.inner.flush_lock.lock();
        let batch = std::mem::take(&mut self.inner.notify.lock().pending);
        for notification in &batch {
            deliver(notification);
        }
        batch.len()
    }

    /// Disconnects every linked endpoint and unlinks the bus from its domain.
    /// Idempotent; never fails.
    pub fn disconnect(&self) {
        let endpoints = {
            let mut state = self.inner.state.lock();
            if state.disconnected {
                return;
            }
            state.disconnected = true;
            state.endpoints.clone()
        };
        for endpoint in endpoints {
            endpoint.disconnect();
        }
        if let Some(domain) = self.inner.domain.upgrade() {
            domain.unlink_bus(&self.inner);
        }
        info!("kbus: bus {} disconnected", self.inner.name);
    }

    fn lookup(&self, name: &str) -> Option<Endpoint> {
        self.inner
            .state
            .lock()
            .endpoints
            .iter()
            .find(|endpoint| endpoint.name() == name && !endpoint.is_disconnected())
            .cloned()
    }

    fn route(&self, notification: &Notification) {
        let endpoints = self.endpoints();
        match notification.destination() {
            Destination::Broadcast => {
                let gated_name = match notification.event() {
                    Event::NameAdded(change) | Event::NameChanged(change) | Event::NameRemoved(change) => {
                        Some(change.name.as_str())
                    }
                    _ => None,
                };
                for endpoint in &endpoints {
                    for conn in endpoint.connections() {
                        // Name events only reach connections the endpoint lets see the name.
                        if let Some(name) = gated_name {
                            if !endpoint.check_see(&conn.credentials(), name) {
                                continue;
                            }
                        }
                        deliver_to(conn.as_ref(), notification);
                    }
                }
            }
            Destination::Connection(id) => {
                let target = endpoints.iter().flat_map(Endpoint::connections).find(|conn| conn.id() == id);
                match target {
                    Some(conn) => deliver_to(conn.as_ref(), notification),
                    None => debug!(
                        "kbus: bus {} dropped {:?} for vanished connection {}",
                        self.inner.name,
                        notification.kind(),
                        id
                    ),
                }
            }
        }
    }
}

fn deliver_to(conn: &dyn Connection, notification: &Notification) {
    if let Err(err) = conn.deliver(notification) {
        warn!("kbus: delivery of {:?} to connection {} failed: {}", notification.kind(), conn.id(), err);
    }
}

impl BusInner {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` over the linked endpoints with the structural lock held.
    pub(crate) fn with_endpoints<R>(&self, f: impl FnOnce(&[Endpoint]) -> R) -> R {
        f(&self.state.lock().endpoints)
    }

    pub(crate) fn unlink_endpoint(&self, endpoint: &Arc<EndpointInner>) {
        self.state.lock().endpoints.retain(|linked| !linked.is(endpoint));
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        // Last handle gone without an explicit disconnect: tear endpoints down so
        // none is freed while still marked live.
        let state = self.state.get_mut();
        state.disconnected = true;
        for endpoint in std::mem::take(&mut state.endpoints) {
            endpoint.disconnect();
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Bus")
            .field("name", &self.inner.name)
            .field("endpoints", &state.endpoints.len())
            .field("endpoint_id_seq", &state.endpoint_id_seq)
            .field("disconnected", &state.disconnected)
            .finish()
    }
}
