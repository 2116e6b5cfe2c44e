use hivelog::core::config::KernelConfig;
use hivelog::core::event_log;
use hivelog::core::store::Store;
use hivelog::core::time;
use hivelog::plugins::reservations::{
    ReservationSelector, ReserveOptions, check_conflicts, check_conflicts_at,
    get_active_reservations, get_active_reservations_at, release_files, renew_reservations,
    reserve_files,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const PROJECT: &str = "/work/repo";

fn paths(p: &[&str]) -> Vec<String> {
    p.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_conflicting_request_grants_nothing() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let held = reserve_files(
        &store,
        PROJECT,
        "BlueLake",
        &paths(&["src/auth/**"]),
        &ReserveOptions::default(),
    )
    .unwrap();
    assert_eq!(held.granted.len(), 1);
    assert!(held.conflicts.is_empty());

    let denied = reserve_files(
        &store,
        PROJECT,
        "GreenCastle",
        &paths(&["docs/readme.md", "src/auth/login.rs"]),
        &ReserveOptions::default(),
    )
    .unwrap();
    assert!(denied.granted.is_empty());
    assert_eq!(denied.conflicts.len(), 1);
    assert_eq!(denied.conflicts[0].path, "src/auth/login.rs");
    assert_eq!(denied.conflicts[0].held_by, "BlueLake");

    assert!(
        get_active_reservations(&store, PROJECT, Some("GreenCastle"))
            .unwrap()
            .is_empty()
    );
    // refused grants append nothing
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), 1);
}

#[test]
fn test_own_and_shared_reservations_do_not_conflict() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["src/**"]),
        &ReserveOptions::default(),
    )
    .unwrap();
    let own = reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["src/lib.rs"]),
        &ReserveOptions::default(),
    )
    .unwrap();
    assert!(own.conflicts.is_empty());

    reserve_files(
        &store,
        PROJECT,
        "B",
        &paths(&["docs/**"]),
        &ReserveOptions {
            exclusive: false,
            ..Default::default()
        },
    )
    .unwrap();
    let c = check_conflicts(&store, PROJECT, &paths(&["docs/a.md"]), Some("C")).unwrap();
    assert!(c.is_empty());
    let c = check_conflicts(&store, PROJECT, &paths(&["src/main.rs"]), Some("C")).unwrap();
    assert_eq!(c.len(), 2);
    let c = check_conflicts(&store, PROJECT, &paths(&["src/main.rs"]), Some("A")).unwrap();
    assert!(c.is_empty());
}

#[test]
fn test_rereserving_same_pattern_leaves_one_active() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let first = reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["src/**"]),
        &ReserveOptions::default(),
    )
    .unwrap();
    let second = reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["src/**"]),
        &ReserveOptions {
            reason: Some("still on it".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let active = get_active_reservations(&store, PROJECT, Some("A")).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.granted[0].id);
    assert_ne!(active[0].id, first.granted[0].id);
    assert_eq!(active[0].reason.as_deref(), Some("still on it"));
}

#[test]
fn test_expired_reservations_vanish_without_release() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let r = reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["src/**"]),
        &ReserveOptions {
            ttl_seconds: Some(120),
            ..Default::default()
        },
    )
    .unwrap();
    let expires_at = r.granted[0].expires_at;

    assert_eq!(
        get_active_reservations_at(&store, PROJECT, None, expires_at - 1)
            .unwrap()
            .len(),
        1
    );
    assert!(
        get_active_reservations_at(&store, PROJECT, None, expires_at)
            .unwrap()
            .is_empty()
    );
    assert!(
        check_conflicts_at(&store, PROJECT, &paths(&["src/a.rs"]), Some("B"), expires_at)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_expired_reservation_no_longer_blocks_grants() {
    let tmp = tempdir().unwrap();
    let mut config = KernelConfig::default();
    config.reservations.min_ttl_seconds = 1;
    let store = Store::at(tmp.path(), config).unwrap();

    reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["src/**"]),
        &ReserveOptions {
            ttl_seconds: Some(1),
            ..Default::default()
        },
    )
    .unwrap();
    thread::sleep(Duration::from_millis(1_100));

    let r = reserve_files(
        &store,
        PROJECT,
        "B",
        &paths(&["src/lib.rs"]),
        &ReserveOptions::default(),
    )
    .unwrap();
    assert_eq!(r.granted.len(), 1);

    // expired rows cannot be renewed
    let renewed =
        renew_reservations(&store, PROJECT, "A", 600, &ReservationSelector::all()).unwrap();
    assert!(renewed.is_empty());
}

#[test]
fn test_release_is_idempotent() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["a.rs", "b.rs"]),
        &ReserveOptions::default(),
    )
    .unwrap();

    let n = release_files(&store, PROJECT, "A", &ReservationSelector::paths(&["a.rs"])).unwrap();
    assert_eq!(n, 1);
    let n = release_files(&store, PROJECT, "A", &ReservationSelector::paths(&["a.rs"])).unwrap();
    assert_eq!(n, 0);
    let n = release_files(&store, PROJECT, "A", &ReservationSelector::all()).unwrap();
    assert_eq!(n, 1);
    let seq = event_log::latest_sequence(&store, Some(PROJECT)).unwrap();
    assert_eq!(release_files(&store, PROJECT, "A", &ReservationSelector::all()).unwrap(), 0);
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), seq);
    assert!(get_active_reservations(&store, PROJECT, None).unwrap().is_empty());
}

#[test]
fn test_renew_extends_selected_reservations() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let r = reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["a.rs", "b.rs"]),
        &ReserveOptions {
            ttl_seconds: Some(300),
            ..Default::default()
        },
    )
    .unwrap();
    let a = r.granted.iter().find(|g| g.path_pattern == "a.rs").unwrap();

    let renewed = renew_reservations(
        &store,
        PROJECT,
        "A",
        600,
        &ReservationSelector::ids(&[a.id.as_str()]),
    )
    .unwrap();
    assert_eq!(renewed.len(), 1);
    assert_eq!(renewed[0].expires_at, a.expires_at + 600 * time::MS_PER_SEC);

    let b = get_active_reservations(&store, PROJECT, Some("A"))
        .unwrap()
        .into_iter()
        .find(|r| r.path_pattern == "b.rs")
        .unwrap();
    let original_b = r.granted.iter().find(|g| g.path_pattern == "b.rs").unwrap();
    assert_eq!(b.expires_at, original_b.expires_at);
}

#[test]
fn test_ttl_below_minimum_is_rejected() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let err = reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["a.rs"]),
        &ReserveOptions {
            ttl_seconds: Some(5),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = reserve_files(&store, PROJECT, "A", &[], &ReserveOptions::default()).unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn test_disjoint_concurrent_reservations_both_succeed() {
    let tmp = tempdir().unwrap();
    let store = Arc::new(Store::at(tmp.path(), KernelConfig::default()).unwrap());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [("A", "src/**"), ("B", "docs/**")]
        .into_iter()
        .map(|(agent, pattern)| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                reserve_files(
                    &store,
                    PROJECT,
                    agent,
                    &[pattern.to_string()],
                    &ReserveOptions::default(),
                )
                .unwrap()
            })
        })
        .collect();

    for h in handles {
        let r = h.join().unwrap();
        assert_eq!(r.granted.len(), 1);
        assert!(r.conflicts.is_empty());
    }
    assert_eq!(get_active_reservations(&store, PROJECT, None).unwrap().len(), 2);
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), 2);
}

#[test]
fn test_contended_path_is_granted_once() {
    let tmp = tempdir().unwrap();
    let store = Arc::new(Store::at(tmp.path(), KernelConfig::default()).unwrap());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .map(|agent| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                reserve_files(
                    &store,
                    PROJECT,
                    agent,
                    &["src/lib.rs".to_string()],
                    &ReserveOptions::default(),
                )
                .unwrap()
            })
        })
        .collect();

    let granted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| !r.granted.is_empty())
        .count();
    assert_eq!(granted, 1);
}

#[test]
fn test_path_spelling_does_not_bypass_exclusive_hold() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    reserve_files(&store, PROJECT, "A", &paths(&["src/**"]), &ReserveOptions::default())
        .unwrap();

    for (agent, spelling) in [("B", "./src/lib.rs"), ("C", "/src/main.rs"), ("D", "src\\core\\db.rs")] {
        let denied = reserve_files(
            &store,
            PROJECT,
            agent,
            &paths(&[spelling]),
            &ReserveOptions::default(),
        )
        .unwrap();
        assert!(denied.granted.is_empty(), "{} was granted", spelling);
        assert_eq!(denied.conflicts.len(), 1);
        assert_eq!(denied.conflicts[0].held_by, "A");
    }

    let conflicts = check_conflicts(&store, PROJECT, &paths(&["./src/a.rs"]), None).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].path, "src/a.rs");
}

#[test]
fn test_paths_are_stored_normalized() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let r = reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["./docs/**", "/docs/**"]),
        &ReserveOptions::default(),
    )
    .unwrap();
    assert_eq!(r.granted.len(), 1);
    assert_eq!(r.granted[0].path_pattern, "docs/**");

    let released = release_files(&store, PROJECT, "A", &ReservationSelector::paths(&["./docs/**"]))
        .unwrap();
    assert_eq!(released, 1);
    assert!(get_active_reservations(&store, PROJECT, Some("A")).unwrap().is_empty());

    let err = reserve_files(&store, PROJECT, "A", &paths(&["./"]), &ReserveOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn test_oversized_ttl_and_extension_are_rejected() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let err = reserve_files(
        &store,
        PROJECT,
        "A",
        &paths(&["a.rs"]),
        &ReserveOptions {
            ttl_seconds: Some(i64::MAX / 10),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), 0);

    let held = reserve_files(&store, PROJECT, "A", &paths(&["a.rs"]), &ReserveOptions::default())
        .unwrap();
    let err = renew_reservations(&store, PROJECT, "A", i64::MAX / 10, &ReservationSelector::all())
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let active = get_active_reservations(&store, PROJECT, Some("A")).unwrap();
    assert_eq!(active[0].expires_at, held.granted[0].expires_at);
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), 1);
}
