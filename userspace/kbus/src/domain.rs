// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Domain (root namespace) owning buses and the minor-id allocator
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + `tests/lifecycle.rs`

use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::bus::BusInner;
use crate::endpoint::EndpointInner;
use crate::{validate_name, Bus, Endpoint, Error, IdAllocator, Limits, MemoryNodeRegistry, NodeRegistry, Result};

/// Root namespace. Cloning yields another handle to the same domain.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

pub(crate) struct DomainInner {
    name: String,
    limits: Limits,
    registry: Arc<dyn NodeRegistry>,
    ids: Mutex<IdAllocator<Weak<EndpointInner>>>,
    state: Mutex<DomainState>,
}

struct DomainState {
    buses: Vec<Bus>,
    disconnected: bool,
}

impl Domain {
    /// Creates a domain with default limits and an in-memory node registry.
    pub fn new(name: &str) -> Self {
        Self::with_limits(name, Limits::default())
    }

    /// Creates a domain with `limits` and an in-memory node registry.
    pub fn with_limits(name: &str, limits: Limits) -> Self {
        Self::with_registry(name, limits, Arc::new(MemoryNodeRegistry::new()))
    }

    /// Creates a domain publishing endpoint nodes through `registry`.
    pub fn with_registry(name: &str, limits: Limits, registry: Arc<dyn NodeRegistry>) -> Self {
        debug!("kbus: create domain {name}");
        Self {
            inner: Arc::new(DomainInner {
                name: name.to_owned(),
                limits,
                registry,
                ids: Mutex::new(IdAllocator::new(limits.max_ids)),
                state: Mutex::new(DomainState { buses: Vec::new(), disconnected: false }),
            }),
        }
    }

    /// Domain name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Limits shared by every object in the domain.
    pub fn limits(&self) -> Limits {
        self.inner.limits
    }

    /// Creates and links a bus named `name`.
    pub fn create_bus(&self, name: &str) -> Result<Bus> {
        validate_name(name, &self.inner.limits)?;
        let mut state = self.inner.state.lock();
        if state.disconnected {
            return Err(Error::ShuttingDown);
        }
        if state.buses.iter().any(|bus| bus.name() == name) {
            return Err(Error::AlreadyExists);
        }
        let bus = Bus::new(name, &self.inner);
        state.buses.push(bus.clone());
        debug!("kbus: domain {} linked bus {}", self.inner.name, name);
        Ok(bus)
    }

    /// Looks up a linked bus by name.
    pub fn bus(&self, name: &str) -> Option<Bus> {
        self.inner.state.lock().buses.iter().find(|bus| bus.name() == name).cloned()
    }

    /// Snapshot of the linked buses, in creation order.
    pub fn buses(&self) -> Vec<Bus> {
        self.inner.state.lock().buses.clone()
    }

    /// Resolves a minor id to its live endpoint.
    pub fn endpoint_by_minor(&self, minor: u32) -> Option<Endpoint> {
        let endpoint = self.inner.ids.lock().get(minor).and_then(Weak::upgrade)?;
        let endpoint = Endpoint::from_inner(endpoint);
        (!endpoint.is_disconnected()).then_some(endpoint)
    }

    /// Number of minor ids currently allocated.
    pub fn live_ids(&self) -> usize {
        self.inner.ids.lock().len()
    }

    /// Returns `true` once [`Domain::disconnect`] has started.
    pub fn is_disconnected(&self) -> bool {
        self.inner.state.lock().disconnected
    }

    /// Disconnects every bus. Idempotent; never fails.
    pub fn disconnect(&self) {
        let buses = {
            let mut state = self.inner.state.lock();
            if state.disconnected {
                return;
            }
            state.disconnected = true;
            state.buses.clone()
        };
        for bus in buses {
            bus.disconnect();
        }
        let live = self.live_ids();
        if live != 0 {
            warn!("kbus: domain {} disconnected with {} ids still allocated", self.inner.name, live);
        }
        info!("kbus: domain {} disconnected", self.inner.name);
    }
}

impl DomainInner {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn limits(&self) -> &Limits {
        &self.limits
    }

    pub(crate) fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.registry
    }

    pub(crate) fn allocate_id(&self, endpoint: &Arc<EndpointInner>) -> Result<u32> {
        self.ids.lock().allocate(Arc::downgrade(endpoint))
    }

    pub(crate) fn release_id(&self, id: u32) {
        self.ids.lock().release(id);
    }

    pub(crate) fn unlink_bus(&self, bus: &Arc<BusInner>) {
        self.state.lock().buses.retain(|linked| !linked.is(bus));
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.inner.name)
            .field("buses", &self.inner.state.lock().buses.len())
            .field("live_ids", &self.live_ids())
            .finish()
    }
}
