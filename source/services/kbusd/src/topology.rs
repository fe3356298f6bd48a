// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Builds the configured domain and tears it down again.

use std::fmt::Write as _;
use std::sync::Arc;

use kbus::{policy, Domain};
use log::info;
use nexus_memfile::Memfile;

use crate::{Config, Error, FsNodeRegistry, Result};

/// A live domain built from a [`Config`]. Dropping it disconnects the domain.
#[derive(Debug)]
pub struct Topology {
    domain: Domain,
    registry: Arc<FsNodeRegistry>,
    memfile_limits: nexus_memfile::Limits,
}

impl Topology {
    /// Creates every configured bus and endpoint and installs initial policy.
    ///
    /// On failure everything created so far is torn down again.
    pub fn bring_up(config: &Config) -> Result<Self> {
        let registry = Arc::new(FsNodeRegistry::new(&config.node_root)?);
        let domain = Domain::with_registry(&config.domain, config.limits.into(), registry.clone());
        let topology = Self { domain, registry, memfile_limits: config.memfile.into() };

        for bus_config in &config.buses {
            let bus = topology
                .domain
                .create_bus(&bus_config.name)
                .map_err(|source| Error::Bus { context: format!("create bus {}", bus_config.name), source })?;
            for endpoint_config in &bus_config.endpoints {
                let at = format!("{}/{}", bus_config.name, endpoint_config.name);
                let endpoint = bus
                    .create_endpoint(&endpoint_config.name, endpoint_config.access(), endpoint_config.policy)
                    .map_err(|source| Error::Bus { context: format!("create endpoint {at}"), source })?;
                if endpoint_config.policy {
                    let items = policy::encode(&endpoint_config.policy_entries());
                    endpoint
                        .set_policy(&items)
                        .map_err(|source| Error::Bus { context: format!("set policy on {at}"), source })?;
                }
            }
        }
        info!(
            "kbusd: domain {} up: {} buses, {} nodes under {}",
            config.domain,
            config.buses.len(),
            topology.registry.len(),
            topology.registry.root().display()
        );
        Ok(topology)
    }

    /// The live domain.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The node registry backing the domain.
    pub fn registry(&self) -> &FsNodeRegistry {
        &self.registry
    }

    /// Human-readable listing of buses and endpoints.
    pub fn summary(&self) -> String {
        let buses = self.domain.buses();
        let mut out = String::new();
        let _ = writeln!(out, "domain {}: {} buses, {} nodes", self.domain.name(), buses.len(), self.registry.len());
        for bus in &buses {
            for endpoint in bus.endpoints() {
                let access = endpoint.access();
                let _ = writeln!(
                    out,
                    "  {} id={} minor={} mode={:#o} uid={} gid={}{}",
                    endpoint.node_path(),
                    endpoint.id(),
                    endpoint.minor(),
                    access.mode,
                    access.owner,
                    access.group,
                    if endpoint.has_policy() { " policy" } else { "" }
                );
            }
        }
        out
    }

    /// Publishes [`Topology::summary`] as a sealed, read-only payload.
    pub fn snapshot(&self) -> Result<Memfile> {
        let text = self.summary();
        let payload = Memfile::with_limits(Some("kbusd-status"), text.len() as u64, self.memfile_limits)?;
        payload.write(0, text.as_bytes())?;
        payload.seal(true)?;
        Ok(payload)
    }

    /// Disconnects the domain, removing every node.
    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for Topology {
    fn drop(&mut self) {
        self.domain.disconnect();
    }
}
