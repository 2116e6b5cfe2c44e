use hivelog::core::config::KernelConfig;
use hivelog::core::error::HivelogError;
use hivelog::core::event_log::{self, EventFilter};
use hivelog::core::events::EventKind;
use hivelog::core::models::{Milestone, RecoveryState};
use hivelog::core::store::Store;
use hivelog::plugins::checkpoint::{
    SaveCheckpointParams, checkpoint_history, list_checkpoints, load_checkpoint, save_checkpoint,
};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const PROJECT: &str = "/work/repo";

fn params<'a>(bead: &'a str, agent: &'a str, percent: u8) -> SaveCheckpointParams<'a> {
    SaveCheckpointParams {
        project_key: PROJECT,
        epic_id: "epic-1",
        bead_id: bead,
        agent_name: agent,
        files: vec!["src/auth.rs".to_string(), "src/session.rs".to_string()],
        strategy: "file-based",
        directives: vec!["keep the public API".to_string()],
        progress_percent: percent,
    }
}

fn recovery_events(store: &Store) -> Vec<(bool, Option<String>)> {
    let filter = EventFilter {
        types: Some(vec!["checkpoint_recovered".to_string()]),
        ..EventFilter::for_project(PROJECT)
    };
    event_log::read(store, &filter)
        .unwrap()
        .into_iter()
        .filter_map(|ev| match ev.kind {
            EventKind::CheckpointRecovered(p) => Some((p.success, p.error)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_save_then_load_recovers_context() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let saved = save_checkpoint(&store, params("bead-1", "BlueLake", 60)).unwrap();
    assert_eq!(saved.recovery_state, RecoveryState::Pending);
    assert_eq!(saved.last_milestone, Milestone::Half);

    let loaded = load_checkpoint(&store, PROJECT, "epic-1", "bead-1", Some("BlueLake")).unwrap();
    assert!(loaded.success);
    assert!(!loaded.fresh_start);
    let ctx = loaded.context.unwrap();
    assert_eq!(ctx.progress_percent, 60);
    assert_eq!(ctx.files, saved.files);
    assert_eq!(ctx.directives, saved.directives);
    assert_eq!(ctx.recovery_state, RecoveryState::Recovered);

    assert_eq!(recovery_events(&store), vec![(true, None)]);
}

#[test]
fn test_load_without_agent_picks_newest() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    save_checkpoint(&store, params("bead-1", "BlueLake", 30)).unwrap();
    thread::sleep(Duration::from_millis(3));
    save_checkpoint(&store, params("bead-1", "GreenCastle", 80)).unwrap();

    let loaded = load_checkpoint(&store, PROJECT, "epic-1", "bead-1", None).unwrap();
    let ctx = loaded.context.unwrap();
    assert_eq!(ctx.agent_name, "GreenCastle");
    assert_eq!(ctx.progress_percent, 80);
}

#[test]
fn test_never_saved_is_a_fresh_start() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let loaded = load_checkpoint(&store, PROJECT, "epic-1", "nothing", None).unwrap();
    assert!(loaded.success);
    assert!(loaded.fresh_start);
    assert!(loaded.context.is_none());
    assert!(recovery_events(&store).is_empty());
}

#[test]
fn test_corrupt_row_fails_loudly_and_is_logged() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    save_checkpoint(&store, params("bead-1", "BlueLake", 40)).unwrap();

    let conn = rusqlite::Connection::open(store.db_path()).unwrap();
    conn.execute(
        "UPDATE swarm_contexts SET files = 'nope' WHERE bead_id = 'bead-1'",
        [],
    )
    .unwrap();
    drop(conn);

    let err = load_checkpoint(&store, PROJECT, "epic-1", "bead-1", Some("BlueLake")).unwrap_err();
    assert!(matches!(err, HivelogError::CorruptCheckpoint(_)));

    let events = recovery_events(&store);
    assert_eq!(events.len(), 1);
    assert!(!events[0].0);
    assert!(events[0].1.is_some());
}

#[test]
fn test_list_skips_corrupt_rows_newest_first() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    save_checkpoint(&store, params("bead-1", "A", 10)).unwrap();
    thread::sleep(Duration::from_millis(3));
    save_checkpoint(&store, params("bead-2", "A", 20)).unwrap();
    thread::sleep(Duration::from_millis(3));
    save_checkpoint(&store, params("bead-3", "A", 30)).unwrap();

    let conn = rusqlite::Connection::open(store.db_path()).unwrap();
    conn.execute(
        "UPDATE swarm_contexts SET directives = '{broken' WHERE bead_id = 'bead-2'",
        [],
    )
    .unwrap();
    drop(conn);

    let beads: Vec<String> = list_checkpoints(&store, PROJECT, "epic-1")
        .unwrap()
        .into_iter()
        .map(|c| c.bead_id)
        .collect();
    assert_eq!(beads, vec!["bead-3", "bead-1"]);
    assert!(list_checkpoints(&store, PROJECT, "epic-9").unwrap().is_empty());
}

#[test]
fn test_history_keeps_every_snapshot() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    for pct in [25, 50, 75] {
        save_checkpoint(&store, params("bead-1", "A", pct)).unwrap();
    }
    save_checkpoint(&store, params("bead-2", "A", 90)).unwrap();

    let history = checkpoint_history(&store, PROJECT, "epic-1", "bead-1").unwrap();
    let pcts: Vec<u8> = history.iter().map(|c| c.progress_percent).collect();
    assert_eq!(pcts, vec![25, 50, 75]);

    // the projection only keeps the latest
    let listed = list_checkpoints(&store, PROJECT, "epic-1").unwrap();
    assert_eq!(listed.len(), 2);
}

#[test]
fn test_save_validation() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let err = save_checkpoint(&store, params("bead-1", "A", 101)).unwrap_err();
    assert_eq!(err.kind(), "validation");
    let err = save_checkpoint(&store, params("", "A", 10)).unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(event_log::latest_sequence(&store, None).unwrap(), 0);
}
