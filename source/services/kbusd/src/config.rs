// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! TOML topology config.
//!
//! ```toml
//! domain = "system"
//! node_root = "/run/kbus"
//! log_level = "info"
//!
//! [limits]
//! max_pending_notifications = 1024
//!
//! [[bus]]
//! name = "bus0"
//!
//! [[bus.endpoint]]
//! name = "ep0"
//! mode = 0o660
//! uid = 1000
//! gid = 100
//! policy = true
//!
//! [[bus.endpoint.rule]]
//! name = "org.nexus.Clock"
//! group = 100
//! access = "talk"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
use serde::Deserialize;

use kbus::policy::{Access, PolicyEntry, PolicyRule, Subject};

use crate::{Error, Result};

const MODE_MASK: u32 = 0o7777;

/// Whole daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Domain name; also the first node path component.
    pub domain: String,
    /// Directory endpoint nodes are created under.
    pub node_root: PathBuf,
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Transport limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Payload limits.
    #[serde(default)]
    pub memfile: MemfileConfig,
    /// Buses to create, in order.
    #[serde(default, rename = "bus")]
    pub buses: Vec<BusConfig>,
}

/// Mirrors [`kbus::Limits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// See [`kbus::Limits::max_ids`].
    pub max_ids: u32,
    /// See [`kbus::Limits::max_pending_notifications`].
    pub max_pending_notifications: usize,
    /// See [`kbus::Limits::max_name_len`].
    pub max_name_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = kbus::Limits::default();
        Self {
            max_ids: limits.max_ids,
            max_pending_notifications: limits.max_pending_notifications,
            max_name_len: limits.max_name_len,
        }
    }
}

impl From<LimitsConfig> for kbus::Limits {
    fn from(config: LimitsConfig) -> Self {
        Self {
            max_ids: config.max_ids,
            max_pending_notifications: config.max_pending_notifications,
            max_name_len: config.max_name_len,
        }
    }
}

/// Mirrors [`nexus_memfile::Limits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemfileConfig {
    /// See [`nexus_memfile::Limits::max_size`].
    pub max_size: u64,
}

impl Default for MemfileConfig {
    fn default() -> Self {
        Self { max_size: nexus_memfile::Limits::default().max_size }
    }
}

impl From<MemfileConfig> for nexus_memfile::Limits {
    fn from(config: MemfileConfig) -> Self {
        Self { max_size: config.max_size }
    }
}

/// One bus and its endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Bus name.
    pub name: String,
    /// Endpoints to create, in order.
    #[serde(default, rename = "endpoint")]
    pub endpoints: Vec<EndpointConfig>,
}

/// One endpoint node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Endpoint name.
    pub name: String,
    /// Node permission bits.
    #[serde(default = "default_mode")]
    pub mode: u32,
    /// Node owner.
    #[serde(default)]
    pub uid: u32,
    /// Node group.
    #[serde(default)]
    pub gid: u32,
    /// Create the endpoint with a policy table.
    #[serde(default)]
    pub policy: bool,
    /// Initial policy rules; requires `policy = true`.
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleConfig>,
}

/// A grant for one well-known name. At most one of `user`/`group`; neither means world.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Well-known name.
    pub name: String,
    /// Granted uid.
    #[serde(default)]
    pub user: Option<u32>,
    /// Granted gid.
    #[serde(default)]
    pub group: Option<u32>,
    /// Granted level.
    pub access: AccessConfig,
}

/// Access level as spelled in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessConfig {
    /// [`Access::See`].
    See,
    /// [`Access::Talk`].
    Talk,
    /// [`Access::Own`].
    Own,
}

impl From<AccessConfig> for Access {
    fn from(access: AccessConfig) -> Self {
        match access {
            AccessConfig::See => Access::See,
            AccessConfig::Talk => Access::Talk,
            AccessConfig::Own => Access::Own,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mode() -> u32 {
    0o600
}

impl Config {
    /// Reads, parses and validates `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|source| Error::Read { path: path.to_path_buf(), source })?;
        Self::parse(&data, path)
    }

    /// Parses and validates `data`; `path` only labels errors.
    pub fn parse(data: &str, path: &Path) -> Result<Self> {
        let config: Config = toml::from_str(data).map_err(|source| Error::Parse { path: path.to_path_buf(), source })?;
        config.validate().map_err(|reason| Error::Invalid { path: path.to_path_buf(), reason })?;
        Ok(config)
    }

    /// Parsed [`Config::log_level`].
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    /// Total number of endpoints across all buses.
    pub fn endpoint_count(&self) -> usize {
        self.buses.iter().map(|bus| bus.endpoints.len()).sum()
    }

    fn validate(&self) -> core::result::Result<(), String> {
        if LevelFilter::from_str(&self.log_level).is_err() {
            return Err(format!("unknown log_level {:?}", self.log_level));
        }
        let limits = kbus::Limits::from(self.limits);
        for bus in &self.buses {
            if kbus::validate_name(&bus.name, &limits).is_err() {
                return Err(format!("invalid bus name {:?}", bus.name));
            }
            if self.buses.iter().filter(|other| other.name == bus.name).count() > 1 {
                return Err(format!("bus {} declared twice", bus.name));
            }
            for endpoint in &bus.endpoints {
                let at = format!("{}/{}", bus.name, endpoint.name);
                if kbus::validate_name(&endpoint.name, &limits).is_err() {
                    return Err(format!("invalid endpoint name {at:?}"));
                }
                if bus.endpoints.iter().filter(|other| other.name == endpoint.name).count() > 1 {
                    return Err(format!("endpoint {at} declared twice"));
                }
                if endpoint.mode & !MODE_MASK != 0 {
                    return Err(format!("endpoint {at}: mode {:#o} exceeds {:#o}", endpoint.mode, MODE_MASK));
                }
                if !endpoint.policy && !endpoint.rules.is_empty() {
                    return Err(format!("endpoint {at}: rules require policy = true"));
                }
                if let Some(rule) = endpoint.rules.iter().find(|rule| rule.user.is_some() && rule.group.is_some()) {
                    return Err(format!("endpoint {at}: rule for {} names both user and group", rule.name));
                }
            }
        }
        Ok(())
    }
}

impl EndpointConfig {
    /// Node access attributes.
    pub fn access(&self) -> kbus::NodeAccess {
        kbus::NodeAccess::new(self.mode, self.uid, self.gid)
    }

    /// Rules grouped by name, in first-appearance order.
    pub fn policy_entries(&self) -> Vec<PolicyEntry> {
        let mut entries: Vec<PolicyEntry> = Vec::new();
        for rule in &self.rules {
            let subject = match (rule.user, rule.group) {
                (Some(uid), _) => Subject::User(uid),
                (None, Some(gid)) => Subject::Group(gid),
                (None, None) => Subject::World,
            };
            let grant = PolicyRule { subject, access: rule.access.into() };
            match entries.iter_mut().find(|entry| entry.name == rule.name) {
                Some(entry) => entry.rules.push(grant),
                None => entries.push(PolicyEntry { name: rule.name.clone(), rules: vec![grant] }),
            }
        }
        entries
    }
}
