// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: kbusd host daemon (config-driven bus topology bring-up)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + `tests/cli.rs`
//!
//! PUBLIC API:
//!   - Config::load(path): TOML topology description
//!   - FsNodeRegistry: endpoint nodes as marker files under a root directory
//!   - Topology::bring_up(&Config) / teardown(): domain, buses, endpoints, policy
//!   - cli::execute(args) / cli::run(): `check` and `up` subcommands
//!
//! DEPENDENCIES:
//!   - kbus: transport core
//!   - nexus-memfile: sealed status snapshot
//!   - serde + toml: config parsing
//!   - clap: argument parsing
//!   - env_logger: log sink for the binary

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod cli;
pub mod config;
mod fs_nodes;
mod topology;

use std::path::PathBuf;

use thiserror::Error;

pub use config::Config;
pub use fs_nodes::FsNodeRegistry;
pub use topology::Topology;

/// Result alias for daemon operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by the daemon.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading a file failed.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for the expected schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },
    /// The config parsed but describes an invalid topology.
    #[error("invalid config {path}: {reason}")]
    Invalid {
        /// Offending file.
        path: PathBuf,
        /// What is wrong.
        reason: String,
    },
    /// The transport core refused an operation.
    #[error("{context}: {source}")]
    Bus {
        /// What was being set up.
        context: String,
        /// Core error.
        #[source]
        source: kbus::Error,
    },
    /// Building the status snapshot failed.
    #[error("status snapshot: {0}")]
    Snapshot(#[from] nexus_memfile::Error),
    /// The command line could not be parsed.
    #[error("{0}")]
    Usage(String),
    /// The node root could not be prepared.
    #[error("node root {path}: {source}")]
    NodeRoot {
        /// Node root directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
