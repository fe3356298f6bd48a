// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Device-node surface for endpoints
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! Every linked endpoint owns exactly one node at `<root>/<domain>/<bus>/<endpoint>`.
//! The registry is an external collaborator; `MemoryNodeRegistry` is the in-process
//! backend used by tests and by default domains.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Relative location of an endpoint node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodePath {
    domain: String,
    bus: String,
    endpoint: String,
}

impl NodePath {
    /// Builds the path for `endpoint` on `bus` in `domain`.
    pub fn new(domain: impl Into<String>, bus: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { domain: domain.into(), bus: bus.into(), endpoint: endpoint.into() }
    }

    /// Domain component.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Bus component.
    pub fn bus(&self) -> &str {
        &self.bus
    }

    /// Endpoint component.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolves the node below `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.domain).join(&self.bus).join(&self.endpoint)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.bus, self.endpoint)
    }
}

/// Opaque token identifying a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(u64);

impl NodeHandle {
    /// Wraps a backend specific token.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the backend specific token.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Attributes a node was registered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node location.
    pub path: NodePath,
    /// Permission bits.
    pub mode: u32,
    /// Owning uid.
    pub owner: u32,
    /// Owning gid.
    pub group: u32,
    /// Minor id from the domain allocator.
    pub minor: u32,
}

/// Creates and removes endpoint nodes.
pub trait NodeRegistry: Send + Sync {
    /// Creates a node described by `record`.
    fn register(&self, record: &NodeRecord) -> Result<NodeHandle>;

    /// Removes a node previously returned by [`NodeRegistry::register`].
    fn unregister(&self, handle: NodeHandle);
}

/// In-memory node registry.
#[derive(Debug, Default)]
pub struct MemoryNodeRegistry {
    next: AtomicU64,
    nodes: Mutex<HashMap<u64, NodeRecord>>,
}

impl MemoryNodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record registered at `path`, if any.
    pub fn lookup(&self, path: &NodePath) -> Option<NodeRecord> {
        self.nodes.lock().values().find(|record| &record.path == path).cloned()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Returns `true` when no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

impl NodeRegistry for MemoryNodeRegistry {
    fn register(&self, record: &NodeRecord) -> Result<NodeHandle> {
        let mut nodes = self.nodes.lock();
        if nodes.values().any(|existing| existing.path == record.path) {
            return Err(Error::AlreadyExists);
        }
        let raw = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        nodes.insert(raw, record.clone());
        Ok(NodeHandle::new(raw))
    }

    fn unregister(&self, handle: NodeHandle) {
        self.nodes.lock().remove(&handle.raw());
    }
}
