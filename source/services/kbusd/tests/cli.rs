// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: kbusd CLI tests
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 5 CLI tests
//!
//! TEST_SCOPE:
//!   - Config validation through `check`
//!   - One-shot bring-up and teardown through `up --once`
//!
//! TEST_SCENARIOS:
//!   - check_reports_topology(): valid config summary
//!   - check_rejects_bad_mode(): invalid config names the file
//!   - check_rejects_duplicate_endpoint(): check refuses what up would refuse
//!   - up_once_creates_and_removes_nodes(): node files appear in the summary and are gone afterwards
//!   - up_once_reports_core_refusal(): core errors surface with context, partial nodes removed

use std::fs;
use std::path::Path;

use tempfile::TempDir;

fn write_config(dir: &Path, body: &str) -> String {
    let root = dir.join("nodes");
    let text = format!("domain = 'system'\nnode_root = '{}'\n{body}", root.display());
    let path = dir.join("kbusd.toml");
    fs::write(&path, text).unwrap();
    path.display().to_string()
}

const TOPOLOGY: &str = "\
[[bus]]
name = 'bus0'

[[bus.endpoint]]
name = 'ep0'
mode = 0o666

[[bus.endpoint]]
name = 'ep1'
policy = true

[[bus.endpoint.rule]]
name = 'org.nexus.Clock'
access = 'see'

[[bus]]
name = 'bus1'
";

#[test]
fn check_reports_topology() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), TOPOLOGY);
    let out = kbusd::cli::execute(&["check", &config]).unwrap();
    assert_eq!(out, "config ok: domain system, 2 buses, 2 endpoints\n");
}

#[test]
fn check_rejects_bad_mode() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "[[bus]]\nname = 'b'\n[[bus.endpoint]]\nname = 'e'\nmode = 0o77777\n");
    let err = kbusd::cli::execute(&["check", &config]).unwrap_err();
    assert!(err.to_string().contains("kbusd.toml"), "{err}");
}

#[test]
fn check_rejects_duplicate_endpoint() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        temp.path(),
        "[[bus]]\nname = 'bus0'\n[[bus.endpoint]]\nname = 'ep0'\n[[bus.endpoint]]\nname = 'ep0'\n",
    );
    let err = kbusd::cli::execute(&["check", &config]).unwrap_err();
    assert!(matches!(err, kbusd::Error::Invalid { .. }), "{err}");
    assert!(err.to_string().contains("bus0/ep0 declared twice"), "{err}");
}

#[test]
fn up_once_creates_and_removes_nodes() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), TOPOLOGY);
    let out = kbusd::cli::execute(&["up", &config, "--once"]).unwrap();
    assert!(out.contains("domain system: 2 buses, 2 nodes"), "{out}");
    assert!(out.contains("system/bus0/ep0 id=1"), "{out}");
    assert!(out.contains("system/bus0/ep1 id=2"), "{out}");
    assert!(out.ends_with("domain system down\n"), "{out}");
    assert!(!temp.path().join("nodes/system/bus0/ep0").exists());
    assert!(!temp.path().join("nodes/system/bus0/ep1").exists());
}

#[test]
fn up_once_reports_core_refusal() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        temp.path(),
        "[limits]\nmax_ids = 1\n[[bus]]\nname = 'bus0'\n[[bus.endpoint]]\nname = 'ep0'\n[[bus.endpoint]]\nname = 'ep1'\n",
    );
    let err = kbusd::cli::execute(&["up", &config, "--once"]).unwrap_err();
    assert!(matches!(err, kbusd::Error::Bus { source: kbus::Error::ResourceExhausted, .. }), "{err}");
    assert!(err.to_string().contains("bus0/ep1"));
    assert!(!temp.path().join("nodes/system/bus0/ep0").exists());
}
