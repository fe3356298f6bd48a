// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! File-backed node registry: each endpoint node is a marker file at
//! `<root>/<domain>/<bus>/<endpoint>` carrying the requested permission bits.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use kbus::{NodeHandle, NodePath, NodeRecord, NodeRegistry};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{Error, Result};

/// Publishes endpoint nodes below a directory.
#[derive(Debug)]
pub struct FsNodeRegistry {
    root: PathBuf,
    next: AtomicU64,
    nodes: Mutex<HashMap<u64, PathBuf>>,
}

impl FsNodeRegistry {
    /// Creates `root` if needed and returns a registry rooted there.
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|source| Error::NodeRoot { path: root.to_path_buf(), source })?;
        Ok(Self { root: root.to_path_buf(), next: AtomicU64::new(0), nodes: Mutex::new(HashMap::new()) })
    }

    /// Node root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of `path`.
    pub fn path_of(&self, path: &NodePath) -> PathBuf {
        path.under(&self.root)
    }

    /// Number of nodes currently published.
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Returns `true` when no node is published.
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    fn create(&self, file: &Path, record: &NodeRecord) -> io::Result<()> {
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut node = OpenOptions::new().write(true).create_new(true).open(file)?;
        writeln!(node, "minor={}\nowner={}\ngroup={}", record.minor, record.owner, record.group)?;
        set_mode(file, record.mode)
    }
}

impl NodeRegistry for FsNodeRegistry {
    fn register(&self, record: &NodeRecord) -> kbus::Result<NodeHandle> {
        let file = self.path_of(&record.path);
        if let Err(err) = self.create(&file, record) {
            if err.kind() == io::ErrorKind::AlreadyExists {
                return Err(kbus::Error::AlreadyExists);
            }
            warn!("kbusd: cannot create node {}: {}", file.display(), err);
            let _ = fs::remove_file(&file);
            return Err(kbus::Error::ResourceExhausted);
        }
        let raw = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("kbusd: node {} mode={:#o} minor={}", file.display(), record.mode, record.minor);
        self.nodes.lock().insert(raw, file);
        Ok(NodeHandle::new(raw))
    }

    fn unregister(&self, handle: NodeHandle) {
        let Some(file) = self.nodes.lock().remove(&handle.raw()) else {
            return;
        };
        if let Err(err) = fs::remove_file(&file) {
            warn!("kbusd: cannot remove node {}: {}", file.display(), err);
            return;
        }
        // Drop the bus directory once its last node is gone; the domain directory stays.
        if let Some(dir) = file.parent() {
            let _ = fs::remove_dir(dir);
        }
    }
}

#[cfg(unix)]
fn set_mode(file: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(file, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(endpoint: &str, mode: u32) -> NodeRecord {
        NodeRecord { path: NodePath::new("system", "bus0", endpoint), mode, owner: 1000, group: 100, minor: 3 }
    }

    #[test]
    fn register_creates_marker_with_mode() {
        let temp = TempDir::new().unwrap();
        let registry = FsNodeRegistry::new(temp.path()).unwrap();
        let handle = registry.register(&record("ep0", 0o640)).unwrap();

        let file = temp.path().join("system/bus0/ep0");
        let text = fs::read_to_string(&file).unwrap();
        assert!(text.contains("minor=3"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o7777, 0o640);
        }

        registry.unregister(handle);
        assert!(!file.exists());
        assert!(!temp.path().join("system/bus0").exists());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_node_is_already_exists() {
        let temp = TempDir::new().unwrap();
        let registry = FsNodeRegistry::new(temp.path()).unwrap();
        let handle = registry.register(&record("ep0", 0o600)).unwrap();
        assert_eq!(registry.register(&record("ep0", 0o600)), Err(kbus::Error::AlreadyExists));
        assert_eq!(registry.len(), 1);
        registry.unregister(handle);
    }
}
