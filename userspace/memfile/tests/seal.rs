// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for memfile sealing under concurrent holders
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCOPE:
//!   - Exclusive-holder precondition for sealing
//!   - Writers racing a seal never mutate sealed data
//!   - Payload handed to another thread observes the frozen snapshot
//!
//! TEST_SCENARIOS:
//!   - seal_waits_for_exclusive_ownership(): seal is Busy until other holders drop
//!   - racing_writers_never_touch_sealed_data(): writes after seal fail, snapshot is stable
//!   - sealed_snapshot_is_shared_read_only(): receivers read the frozen bytes

use std::thread;

use nexus_memfile::{Error, Memfile};

#[test]
fn seal_waits_for_exclusive_ownership() {
    let sp = Memfile::new(Some("exclusive"), 32).expect("create");
    let holders: Vec<Memfile> = (0..4).map(|_| sp.clone()).collect();
    assert_eq!(sp.holders(), 5);
    assert_eq!(sp.seal(true), Err(Error::Busy));

    let joins: Vec<_> = holders
        .into_iter()
        .map(|holder| thread::spawn(move || drop(holder)))
        .collect();
    for join in joins {
        join.join().expect("holder thread");
    }

    assert_eq!(sp.holders(), 1);
    sp.seal(true).expect("seal once exclusive");
}

#[test]
fn racing_writers_never_touch_sealed_data() {
    let sp = Memfile::new(None, 64).expect("create");

    // Sealing only succeeds once every writer clone is gone.
    let writers: Vec<_> = (0..4u8)
        .map(|n| {
            let handle = sp.clone();
            thread::spawn(move || {
                for i in 0..64u64 {
                    match handle.write(i, &[n]) {
                        Ok(()) | Err(Error::PermissionDenied) => {}
                        Err(other) => panic!("unexpected write error: {other}"),
                    }
                }
            })
        })
        .collect();

    loop {
        match sp.seal(true) {
            Ok(()) => break,
            Err(Error::Busy) => thread::yield_now(),
            Err(other) => panic!("unexpected seal error: {other}"),
        }
    }
    for writer in writers {
        writer.join().expect("writer thread");
    }

    let snapshot = sp.to_vec();
    assert_eq!(sp.write(0, &[0xff]), Err(Error::PermissionDenied));
    assert_eq!(sp.map(0, 64, true).unwrap_err(), Error::PermissionDenied);
    assert_eq!(sp.to_vec(), snapshot);
}

#[test]
fn sealed_snapshot_is_shared_read_only() {
    let sp = Memfile::new(Some("frozen"), 0).expect("create");
    sp.resize(4).expect("resize");
    sp.write(0, b"kbus").expect("write");
    sp.seal(true).expect("seal");

    let receiver = sp.clone();
    let seen = thread::spawn(move || {
        let region = receiver.map(0, 4, false).expect("map read-only");
        region.to_vec().expect("read mapping")
    })
    .join()
    .expect("receiver thread");

    assert_eq!(seen, b"kbus".to_vec());
    assert_eq!(sp.holders(), 1);
    assert_eq!(sp.mappings(), 0);
}
