// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host tests for domain/bus/endpoint lifecycle
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 9 integration tests
//!
//! TEST_SCENARIOS:
//!   - Endpoint ids increase per bus and are never reused
//!   - Names are unique per bus, not per domain
//!   - Teardown severs connections before the name stops resolving
//!   - Device nodes follow endpoint lifetime
//!   - Policy updates and attach gating

mod common;

use std::sync::Arc;

use common::RecordingConnection;
use kbus::policy::encode;
use kbus::{
    Access, Credentials, Domain, Error, Event, IdChange, Limits, MemoryNodeRegistry, NodeAccess, NodePath,
    NotificationType, PolicyEntry, PolicyRule, Subject,
};

#[test]
fn endpoint_ids_are_not_reused() {
    let domain = Domain::new("system");
    let bus = domain.create_bus("bus0").unwrap();

    let ep = bus.create_endpoint("ep0", NodeAccess::default(), false).unwrap();
    assert_eq!(ep.id(), 1);
    assert_eq!(bus.create_endpoint("ep0", NodeAccess::default(), false).unwrap_err(), Error::AlreadyExists);

    ep.disconnect();
    assert!(bus.endpoints().is_empty());

    let again = bus.create_endpoint("ep0", NodeAccess::default(), false).unwrap();
    assert_eq!(again.id(), 2);
    domain.disconnect();
}

#[test]
fn names_are_scoped_to_their_bus() {
    let domain = Domain::new("system");
    let a = domain.create_bus("a").unwrap();
    let b = domain.create_bus("b").unwrap();
    let ep_a = a.create_endpoint("ep0", NodeAccess::default(), false).unwrap();
    let ep_b = b.create_endpoint("ep0", NodeAccess::default(), false).unwrap();
    assert_eq!(ep_a.id(), 1);
    assert_eq!(ep_b.id(), 1);
    assert_ne!(ep_a.minor(), ep_b.minor());
    domain.disconnect();
}

#[test]
fn nodes_follow_endpoint_lifetime() {
    let registry = Arc::new(MemoryNodeRegistry::new());
    let domain = Domain::with_registry("system", Limits::default(), registry.clone());
    let bus = domain.create_bus("bus0").unwrap();
    let ep = bus.create_endpoint("ep0", NodeAccess::new(0o660, 1000, 100), false).unwrap();

    let record = registry.lookup(&NodePath::new("system", "bus0", "ep0")).unwrap();
    assert_eq!(record.mode, 0o660);
    assert_eq!(record.owner, 1000);
    assert_eq!(record.group, 100);
    assert_eq!(record.minor, ep.minor());

    ep.disconnect();
    assert!(registry.is_empty());
    assert_eq!(domain.live_ids(), 0);
}

#[test]
fn exhausted_id_space_rolls_back_creation() {
    let limits = Limits { max_ids: 1, ..Limits::default() };
    let registry = Arc::new(MemoryNodeRegistry::new());
    let domain = Domain::with_registry("system", limits, registry.clone());
    let bus = domain.create_bus("bus0").unwrap();
    let first = bus.create_endpoint("ep0", NodeAccess::default(), false).unwrap();
    assert_eq!(bus.create_endpoint("ep1", NodeAccess::default(), false).unwrap_err(), Error::ResourceExhausted);
    assert_eq!(bus.endpoints().len(), 1);
    assert_eq!(registry.len(), 1);

    first.disconnect();
    let second = bus.create_endpoint("ep1", NodeAccess::default(), false).unwrap();
    assert_eq!(second.id(), 2);
    domain.disconnect();
}

#[test]
fn teardown_severs_connections_first() {
    let domain = Domain::new("system");
    let bus = domain.create_bus("bus0").unwrap();
    let ep = bus.create_endpoint("ep0", NodeAccess::new(0o666, 0, 0), false).unwrap();

    let conns: Vec<_> = (1..=3).map(|id| RecordingConnection::with_flags(id, 1000, 100, id * 10)).collect();
    for conn in &conns {
        conn.observe(&ep);
        ep.attach(conn.clone()).unwrap();
    }
    bus.flush_notifications();

    ep.disconnect();
    ep.disconnect();
    for conn in &conns {
        assert_eq!(conn.disconnects(), 1);
        assert_eq!(conn.endpoint_was_disconnected(), Some(true));
    }
    assert_eq!(ep.attach(RecordingConnection::new(9, 1000, 100)).unwrap_err(), Error::ShuttingDown);
    assert!(bus.endpoint("ep0").is_none());

    let mut removed = Vec::new();
    bus.flush_with(|n| {
        if let Event::IdRemoved(change) = n.event() {
            removed.push(*change);
        }
    });
    assert_eq!(
        removed,
        vec![IdChange { id: 1, flags: 10 }, IdChange { id: 2, flags: 20 }, IdChange { id: 3, flags: 30 }]
    );
}

#[test]
fn disconnected_bus_and_domain_refuse_children() {
    let domain = Domain::new("system");
    let bus = domain.create_bus("bus0").unwrap();
    let ep = bus.create_endpoint("ep0", NodeAccess::default(), false).unwrap();

    bus.disconnect();
    assert!(ep.is_disconnected());
    assert_eq!(bus.create_endpoint("ep1", NodeAccess::default(), false).unwrap_err(), Error::ShuttingDown);

    domain.disconnect();
    assert_eq!(domain.create_bus("bus1").unwrap_err(), Error::ShuttingDown);
}

#[test]
fn references_outlive_teardown() {
    let domain = Domain::new("system");
    let bus = domain.create_bus("bus0").unwrap();
    let ep = bus.create_endpoint("ep0", NodeAccess::default(), false).unwrap();
    let held = ep.acquire();

    domain.disconnect();
    drop(domain);
    drop(bus);
    drop(ep);

    assert_eq!(held.ref_count(), 1);
    assert!(held.is_disconnected());
    assert_eq!(held.name(), "ep0");
    held.release();
}

#[test]
fn policy_updates_replace_the_table() {
    let domain = Domain::new("system");
    let bus = domain.create_bus("bus0").unwrap();
    let plain = bus.create_endpoint("plain", NodeAccess::default(), false).unwrap();
    let gated = bus.create_endpoint("gated", NodeAccess::default(), true).unwrap();
    let user = Credentials::new(1000, 100);

    assert_eq!(plain.set_policy(&[]).unwrap_err(), Error::NotSupported);
    assert!(gated.set_policy(&[]).is_ok());
    assert!(!gated.check_see(&user, "org.nexus.Clock"));

    let first = encode(&[PolicyEntry {
        name: "org.nexus.Clock".into(),
        rules: vec![PolicyRule { subject: Subject::Group(100), access: Access::Own }],
    }]);
    gated.set_policy(&first).unwrap();
    assert!(gated.check_own(&user, "org.nexus.Clock"));

    let second = encode(&[PolicyEntry {
        name: "org.nexus.Clock".into(),
        rules: vec![PolicyRule { subject: Subject::World, access: Access::See }],
    }]);
    gated.set_policy(&second).unwrap();
    assert!(gated.check_see(&user, "org.nexus.Clock"));
    assert!(!gated.check_talk(&user, "org.nexus.Clock"));

    let mut truncated = second.clone();
    truncated.truncate(6);
    assert_eq!(gated.set_policy(&truncated).unwrap_err(), Error::InvalidArgument);
    assert!(gated.check_see(&user, "org.nexus.Clock"));
    domain.disconnect();
}

#[test]
fn attach_announces_connection() {
    let domain = Domain::new("system");
    let bus = domain.create_bus("bus0").unwrap();
    let ep = bus.create_endpoint("ep0", NodeAccess::new(0o600, 1000, 100), false).unwrap();

    assert_eq!(ep.attach(RecordingConnection::new(1, 2000, 100)).unwrap_err(), Error::PermissionDenied);
    let conn = RecordingConnection::with_flags(bus.next_connection_id(), 1000, 100, 7);
    ep.attach(conn.clone()).unwrap();
    bus.flush_notifications();

    let inbox = conn.inbox();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind(), NotificationType::IdAdded);
    assert_eq!(inbox[0].event(), &Event::IdAdded(IdChange { id: 1, flags: 7 }));

    assert!(ep.detach(1));
    assert_eq!(ep.connection_count(), 0);
    assert_eq!(bus.pending_notifications(), 1);
    domain.disconnect();
}
