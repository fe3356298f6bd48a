// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Endpoint (policy-gated attachment point for connections)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + `tests/lifecycle.rs`
//!
//! INVARIANTS:
//!   - `id` is set exactly once, when the bus links the endpoint
//!   - Once disconnected, no connection attaches and name lookup misses
//!   - Freed only after disconnect completed (asserted on drop)
//!
//! TEARDOWN ORDER:
//!   1. mark disconnected (no new connections)
//!   2. sever attached connections, one at a time, with no lock held
//!   3. unlink from the bus
//!   4. remove the device node
//!   5. return the minor id to the domain

use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, info};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::bus::BusInner;
use crate::domain::DomainInner;
use crate::policy::{self, Access, PolicyTable};
use crate::{Bus, Connection, Credentials, Error, NodeHandle, NodePath, NodeRecord, NodeRegistry, Result};

/// Permission bits and ownership of an endpoint node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAccess {
    /// Permission bits (`0o7777` mask).
    pub mode: u32,
    /// Owning uid.
    pub owner: u32,
    /// Owning gid.
    pub group: u32,
}

impl NodeAccess {
    /// Creates node access attributes.
    pub const fn new(mode: u32, owner: u32, group: u32) -> Self {
        Self { mode, owner, group }
    }

    /// Returns `true` when `creds` may open the node for reading and writing.
    pub fn grants(&self, creds: &Credentials) -> bool {
        if creds.is_privileged() {
            return true;
        }
        let bits = if creds.uid == self.owner {
            self.mode >> 6
        } else if creds.gid == self.group {
            self.mode >> 3
        } else {
            self.mode
        };
        bits & 0o6 == 0o6
    }
}

impl Default for NodeAccess {
    fn default() -> Self {
        Self::new(0o600, 0, 0)
    }
}

/// Reference-counted endpoint handle. Cloning acquires a reference.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

pub(crate) struct EndpointInner {
    name: String,
    access: NodeAccess,
    path: NodePath,
    id: OnceCell<u64>,
    minor: OnceCell<u32>,
    node: Mutex<Option<NodeHandle>>,
    policy: Option<Mutex<PolicyTable>>,
    state: Mutex<EndpointState>,
    bus: Weak<BusInner>,
    domain: Weak<DomainInner>,
    registry: Arc<dyn NodeRegistry>,
}

struct EndpointState {
    connections: Vec<Attached>,
    disconnected: bool,
}

struct Attached {
    id: u64,
    flags: u64,
    conn: Arc<dyn Connection>,
}

impl Endpoint {
    pub(crate) fn build(
        domain: &Arc<DomainInner>,
        bus: &Arc<BusInner>,
        name: &str,
        access: NodeAccess,
        policy_enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                name: name.to_owned(),
                access,
                path: NodePath::new(domain.name(), bus.name(), name),
                id: OnceCell::new(),
                minor: OnceCell::new(),
                node: Mutex::new(None),
                policy: policy_enabled.then(|| Mutex::new(PolicyTable::default())),
                state: Mutex::new(EndpointState { connections: Vec::new(), disconnected: false }),
                bus: Arc::downgrade(bus),
                domain: Arc::downgrade(domain),
                registry: Arc::clone(domain.registry()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<EndpointInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn is(&self, other: &Arc<EndpointInner>) -> bool {
        Arc::ptr_eq(&self.inner, other)
    }

    /// Allocates the minor id and publishes the device node.
    pub(crate) fn register_node(&self, domain: &Arc<DomainInner>) -> Result<()> {
        let minor = domain.allocate_id(&self.inner)?;
        let _ = self.inner.minor.set(minor);
        let record = NodeRecord {
            path: self.inner.path.clone(),
            mode: self.inner.access.mode,
            owner: self.inner.access.owner,
            group: self.inner.access.group,
            minor,
        };
        let handle = self.inner.registry.register(&record)?;
        *self.inner.node.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn assign_id(&self, id: u64) {
        assert!(self.inner.id.set(id).is_ok(), "kbus: endpoint {} linked twice", self.inner.name);
    }

    /// Bus-unique id; `0` only for an endpoint that was never linked.
    pub fn id(&self) -> u64 {
        self.inner.id.get().copied().unwrap_or(0)
    }

    /// Minor id from the domain allocator.
    pub fn minor(&self) -> u32 {
        self.inner.minor.get().copied().unwrap_or(0)
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Node mode and ownership.
    pub fn access(&self) -> NodeAccess {
        self.inner.access
    }

    /// Node permission bits.
    pub fn mode(&self) -> u32 {
        self.inner.access.mode
    }

    /// Node owner uid.
    pub fn owner(&self) -> u32 {
        self.inner.access.owner
    }

    /// Node group gid.
    pub fn group(&self) -> u32 {
        self.inner.access.group
    }

    /// Device-node location.
    pub fn node_path(&self) -> &NodePath {
        &self.inner.path
    }

    /// Returns `true` when the endpoint carries a policy table.
    pub fn has_policy(&self) -> bool {
        self.inner.policy.is_some()
    }

    /// Returns `true` once [`Endpoint::disconnect`] has started.
    pub fn is_disconnected(&self) -> bool {
        self.inner.state.lock().disconnected
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    pub(crate) fn has_connection(&self, conn_id: u64) -> bool {
        self.inner.state.lock().connections.iter().any(|attached| attached.id == conn_id)
    }

    /// Snapshot of the attached connections.
    pub fn connections(&self) -> Vec<Arc<dyn Connection>> {
        self.inner.state.lock().connections.iter().map(|attached| Arc::clone(&attached.conn)).collect()
    }

    /// Number of live references to this endpoint.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Takes another reference.
    pub fn acquire(&self) -> Self {
        self.clone()
    }

    /// Drops this reference; the last one frees the endpoint.
    pub fn release(self) {
        drop(self);
    }

    /// Attaches `conn` and announces it on the bus.
    ///
    /// Fails with [`Error::PermissionDenied`] when the node mode does not grant
    /// the connection's credentials read/write access, [`Error::ShuttingDown`]
    /// after disconnect, and [`Error::AlreadyExists`] when a connection with the
    /// same id is attached anywhere on the bus.
    pub fn attach(&self, conn: Arc<dyn Connection>) -> Result<()> {
        if !self.inner.access.grants(&conn.credentials()) {
            return Err(Error::PermissionDenied);
        }
        let (id, flags) = (conn.id(), conn.flags());
        let link = |linked: &[Endpoint]| -> Result<()> {
            if linked.iter().any(|other| !other.is(&self.inner) && other.has_connection(id)) {
                return Err(Error::AlreadyExists);
            }
            let mut state = self.inner.state.lock();
            if state.disconnected {
                return Err(Error::ShuttingDown);
            }
            if state.connections.iter().any(|attached| attached.id == id) {
                return Err(Error::AlreadyExists);
            }
            state.connections.push(Attached { id, flags, conn });
            Ok(())
        };
        // The bus structural lock spans the id check and the push.
        let bus = self.bus();
        match &bus {
            Some(bus) => bus.inner.with_endpoints(link)?,
            None => link(&[])?,
        }
        if let Some(bus) = &bus {
            // Best effort: a full queue is logged by the bus.
            let _ = bus.id_added(id, flags);
        }
        debug!("kbus: endpoint {} attached connection {}", self.inner.path, id);
        Ok(())
    }

    /// Connection-initiated detach. Returns `true` when `conn_id` was attached.
    pub fn detach(&self, conn_id: u64) -> bool {
        let detached = {
            let mut state = self.inner.state.lock();
            let position = state.connections.iter().position(|attached| attached.id == conn_id);
            position.map(|index| state.connections.remove(index))
        };
        let Some(attached) = detached else {
            return false;
        };
        if let Some(bus) = self.bus() {
            // Best effort: a full queue is logged by the bus.
            let _ = bus.id_removed(attached.id, attached.flags);
        }
        debug!("kbus: endpoint {} detached connection {}", self.inner.path, conn_id);
        true
    }

    /// Replaces the policy table with the rules in `items`.
    ///
    /// [`Error::NotSupported`] without a policy table, [`Error::ShuttingDown`]
    /// after disconnect, [`Error::InvalidArgument`] for a malformed stream. An
    /// empty stream succeeds and changes nothing.
    pub fn set_policy(&self, items: &[u8]) -> Result<()> {
        let table = self.inner.policy.as_ref().ok_or(Error::NotSupported)?;
        if self.is_disconnected() {
            return Err(Error::ShuttingDown);
        }
        let entries = policy::decode(items)?;
        if entries.is_empty() {
            return Ok(());
        }
        *table.lock() = PolicyTable::from_entries(entries);
        debug!("kbus: endpoint {} policy updated", self.inner.path);
        Ok(())
    }

    /// Policy gate: may `creds` see `name` through this endpoint?
    pub fn check_see(&self, creds: &Credentials, name: &str) -> bool {
        self.check(creds, name, Access::See)
    }

    /// Policy gate: may `creds` talk to `name` through this endpoint?
    pub fn check_talk(&self, creds: &Credentials, name: &str) -> bool {
        self.check(creds, name, Access::Talk)
    }

    /// Policy gate: may `creds` own `name` through this endpoint?
    pub fn check_own(&self, creds: &Credentials, name: &str) -> bool {
        self.check(creds, name, Access::Own)
    }

    /// Tears the endpoint down. Idempotent; never fails.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.disconnected {
                return;
            }
            state.disconnected = true;
        }

        let bus = self.bus();
        loop {
            let attached = {
                let mut state = self.inner.state.lock();
                if state.connections.is_empty() {
                    break;
                }
                state.connections.remove(0)
            };
            attached.conn.disconnect();
            if let Some(bus) = &bus {
                // Best effort, as in `detach`.
                let _ = bus.id_removed(attached.id, attached.flags);
            }
        }

        if let Some(bus) = &bus {
            bus.inner.unlink_endpoint(&self.inner);
        }
        if let Some(handle) = self.inner.node.lock().take() {
            self.inner.registry.unregister(handle);
        }
        if let Some(&minor) = self.inner.minor.get() {
            if let Some(domain) = self.inner.domain.upgrade() {
                domain.release_id(minor);
            }
        }
        info!("kbus: endpoint {} disconnected", self.inner.path);
    }

    fn bus(&self) -> Option<Bus> {
        self.inner.bus.upgrade().map(Bus::from_inner)
    }

    fn check(&self, creds: &Credentials, name: &str, access: Access) -> bool {
        match &self.inner.policy {
            Some(table) => table.lock().check(creds, name, access),
            None => true,
        }
    }
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        assert!(
            state.disconnected && state.connections.is_empty(),
            "kbus: endpoint {} freed while still live",
            self.path
        );
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.inner.path)
            .field("id", &self.id())
            .field("minor", &self.minor())
            .field("policy", &self.has_policy())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}
