use hivelog::core::broker::{self, DbBroker};
use hivelog::core::config::KernelConfig;
use hivelog::core::db;
use hivelog::core::error::HivelogError;
use hivelog::core::event_log::{self, EventFilter};
use hivelog::core::events::{AgentActive, EventKind};
use hivelog::core::models::Importance;
use hivelog::core::projections::{self, MemoryProjections, ProjectionStore, apply_event};
use hivelog::core::store::Store;
use hivelog::plugins::agents::{RegisterAgentParams, register_agent};
use hivelog::plugins::checkpoint::{SaveCheckpointParams, load_checkpoint, save_checkpoint};
use hivelog::plugins::mail::{SendMessageParams, acknowledge, mark_read, send_message};
use hivelog::plugins::reservations::{
    ReservationSelector, ReserveOptions, release_files, renew_reservations, reserve_files,
};
use hivelog::plugins::tasks::{ReportProgressParams, report_progress, start_task};
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

const PROJECT: &str = "/work/repo";

fn active(name: &str) -> EventKind {
    EventKind::AgentActive(AgentActive {
        agent_name: name.to_string(),
    })
}

/// A session touching every projection.
fn busy_session(store: &Store) {
    for name in ["BlueLake", "GreenCastle"] {
        register_agent(
            store,
            RegisterAgentParams {
                project_key: PROJECT,
                name,
                program: "opencode",
                model: "sonnet",
                task_description: Some("auth refactor"),
            },
        )
        .unwrap();
    }

    let to = vec!["GreenCastle".to_string()];
    let msg = send_message(
        store,
        SendMessageParams {
            project_key: PROJECT,
            from_agent: "BlueLake",
            to: &to,
            subject: "auth is mine",
            body: "taking src/auth",
            thread_id: Some("t-auth"),
            importance: Importance::High,
            ack_required: true,
        },
    )
    .unwrap();
    mark_read(store, PROJECT, "GreenCastle", &msg.id).unwrap();
    acknowledge(store, PROJECT, "GreenCastle", &msg.id).unwrap();

    reserve_files(
        store,
        PROJECT,
        "BlueLake",
        &["src/auth/**".to_string(), "Cargo.toml".to_string()],
        &ReserveOptions::default(),
    )
    .unwrap();
    renew_reservations(store, PROJECT, "BlueLake", 600, &ReservationSelector::all()).unwrap();
    release_files(
        store,
        PROJECT,
        "BlueLake",
        &ReservationSelector::paths(&["Cargo.toml"]),
    )
    .unwrap();

    start_task(store, PROJECT, "BlueLake", "bead-1", Some("epic-1")).unwrap();
    save_checkpoint(
        store,
        SaveCheckpointParams {
            project_key: PROJECT,
            epic_id: "epic-1",
            bead_id: "bead-1",
            agent_name: "BlueLake",
            files: vec!["src/auth/mod.rs".to_string()],
            strategy: "file-based",
            directives: Vec::new(),
            progress_percent: 10,
        },
    )
    .unwrap();
    report_progress(
        store,
        ReportProgressParams {
            project_key: PROJECT,
            agent_name: "BlueLake",
            bead_id: "bead-1",
            epic_id: Some("epic-1"),
            progress_percent: 55,
            previous_percent: None,
            message: Some("halfway"),
            files: Vec::new(),
        },
    )
    .unwrap();
    load_checkpoint(store, PROJECT, "epic-1", "bead-1", Some("BlueLake")).unwrap();
}

#[test]
fn test_replay_into_memory_matches_live_projections() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    busy_session(&store);

    let events = event_log::read(&store, &EventFilter::for_project(PROJECT)).unwrap();
    let mut memory = MemoryProjections::default();
    for ev in &events {
        assert!(apply_event(&mut memory, ev).unwrap());
    }

    let live = projections::snapshot(&store, PROJECT).unwrap();
    assert_eq!(memory.snapshot(PROJECT).unwrap(), live);
    assert_eq!(live.last_sequence, events.len() as i64);
    assert_eq!(live.agents.len(), 2);
    assert_eq!(live.reservations.len(), 2);
    assert_eq!(live.contexts.len(), 1);

    // a second pass is a no-op
    for ev in &events {
        assert!(!apply_event(&mut memory, ev).unwrap());
    }
    assert_eq!(memory.snapshot(PROJECT).unwrap(), live);
}

#[test]
fn test_rebuild_reproduces_projections() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    busy_session(&store);
    register_agent(
        &store,
        RegisterAgentParams {
            project_key: "/other",
            name: "RedStone",
            program: "opencode",
            model: "sonnet",
            task_description: None,
        },
    )
    .unwrap();

    let before = projections::snapshot(&store, PROJECT).unwrap();
    let other_before = projections::snapshot(&store, "/other").unwrap();
    let replayed = projections::rebuild_projections(&store, PROJECT).unwrap();

    assert_eq!(replayed as i64, before.last_sequence);
    assert_eq!(projections::snapshot(&store, PROJECT).unwrap(), before);
    assert_eq!(projections::snapshot(&store, "/other").unwrap(), other_before);

    projections::rebuild_projections(&store, PROJECT).unwrap();
    assert_eq!(projections::snapshot(&store, PROJECT).unwrap(), before);
}

#[test]
fn test_failed_transaction_leaves_no_event() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let result: Result<(), HivelogError> =
        DbBroker::new(&store).with_tx("BlueLake", "test.rollback", |conn| {
            event_log::append_and_project(conn, PROJECT, active("BlueLake"), 1)?;
            Err(HivelogError::Conflict("abort".into()))
        });
    assert!(matches!(result, Err(HivelogError::Conflict(_))));
    assert_eq!(event_log::latest_sequence(&store, None).unwrap(), 0);

    let audit = broker::audit_log(&store).unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last.op, "test.rollback");
    assert_eq!(last.actor, "BlueLake");
    assert_eq!(last.status, "error");
}

#[test]
fn test_every_brokered_op_is_audited() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    let before = broker::audit_log(&store).unwrap().len();

    event_log::append(&store, PROJECT, active("BlueLake")).unwrap();
    event_log::latest_sequence(&store, Some(PROJECT)).unwrap();

    let audit = broker::audit_log(&store).unwrap();
    assert_eq!(audit.len(), before + 2);
    assert_eq!(audit[before].op, "event_log.append.agent_active");
    assert_eq!(audit[before].actor, "BlueLake");
    assert_eq!(audit[before].status, "success");
    assert_eq!(audit[before].db_id, "hivelog.db");
}

#[test]
fn test_audit_failure_does_not_fail_committed_write() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    let audit_path = store.root.join(broker::AUDIT_LOG_NAME);
    if audit_path.exists() {
        fs::remove_file(&audit_path).unwrap();
    }
    fs::create_dir(&audit_path).unwrap();

    let appended = event_log::append(&store, PROJECT, active("BlueLake")).unwrap();
    assert_eq!(appended.sequence, 1);
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), 1);

    let result: Result<(), HivelogError> =
        DbBroker::new(&store).with_tx("BlueLake", "test.rollback", |_| {
            Err(HivelogError::Conflict("abort".into()))
        });
    assert!(matches!(result, Err(HivelogError::Conflict(_))));
}

#[test]
fn test_read_filters_compose() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    busy_session(&store);
    event_log::append(&store, "/other", active("RedStone")).unwrap();

    let all = event_log::read(&store, &EventFilter::for_project(PROJECT)).unwrap();
    let seqs: Vec<i64> = all.iter().map(|e| e.sequence).collect();
    assert_eq!(seqs, (1..=all.len() as i64).collect::<Vec<_>>());

    let reserved = event_log::read(
        &store,
        &EventFilter {
            types: Some(vec!["file_reserved".into(), "file_released".into()]),
            ..EventFilter::for_project(PROJECT)
        },
    )
    .unwrap();
    let types: Vec<&str> = reserved.iter().map(|e| e.kind.event_type()).collect();
    assert_eq!(types, vec!["file_reserved", "file_released"]);

    let tail = event_log::read(
        &store,
        &EventFilter {
            after_sequence: Some(all.len() as i64 - 2),
            ..EventFilter::for_project(PROJECT)
        },
    )
    .unwrap();
    assert_eq!(tail.len(), 2);

    let limited = event_log::read(
        &store,
        &EventFilter {
            limit: Some(3),
            ..EventFilter::for_project(PROJECT)
        },
    )
    .unwrap();
    assert_eq!(limited.len(), 3);
    assert_eq!(limited[0].sequence, 1);

    let everywhere = event_log::read(&store, &EventFilter::default()).unwrap();
    assert_eq!(everywhere.len(), all.len() + 1);
    assert_eq!(event_log::latest_sequence(&store, Some("/other")).unwrap(), 1);
}

#[test]
fn test_concurrent_appends_stay_gapless() {
    let tmp = tempdir().unwrap();
    let store = Arc::new(Store::at(tmp.path(), KernelConfig::default()).unwrap());
    let workers = 8;
    let per_worker = 5;
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_worker)
                    .map(|_| {
                        event_log::append(&store, PROJECT, active(&format!("agent-{}", i)))
                            .unwrap()
                            .sequence
                    })
                    .collect::<Vec<i64>>()
            })
        })
        .collect();

    let mut seqs: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=(workers * per_worker) as i64).collect::<Vec<_>>());
}

#[test]
fn test_store_open_reads_config_and_stamps_schema() {
    let tmp = tempdir().unwrap();
    let hivelog_dir = tmp.path().join(".hivelog");
    fs::create_dir_all(&hivelog_dir).unwrap();
    fs::write(
        hivelog_dir.join("config.toml"),
        "[reservations]\ndefault_ttl_seconds = 120\n",
    )
    .unwrap();

    let store = Store::open(tmp.path()).unwrap();
    assert_eq!(store.config.reservations.default_ttl_seconds, 120);
    assert_eq!(store.root, hivelog_dir.join("data"));
    assert!(store.db_path().is_file());
    assert_eq!(db::schema_version(&store).unwrap(), Some(1));

    // reopening is idempotent
    let again = Store::open(tmp.path()).unwrap();
    assert_eq!(db::schema_version(&again).unwrap(), Some(1));
}

#[test]
fn test_store_open_rejects_bad_config() {
    let tmp = tempdir().unwrap();
    let hivelog_dir = tmp.path().join(".hivelog");
    fs::create_dir_all(&hivelog_dir).unwrap();
    fs::write(hivelog_dir.join("config.toml"), "[mandates]\nhalf_life_days = 0.0\n").unwrap();

    let err = Store::open(tmp.path()).unwrap_err();
    assert!(matches!(err, HivelogError::ConfigError(_)));
    assert_eq!(err.kind(), "validation");
}

#[test]
fn test_cli_commands_return_json_payloads() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().to_string_lossy().to_string();
    let base = ["hivelog", "--dir", dir.as_str(), "--project", PROJECT];
    let run = |rest: &[&str]| {
        let args: Vec<&str> = base.iter().chain(rest.iter()).copied().collect();
        hivelog::run_args(args)
    };

    let out = run(&[
        "agent", "register", "--name", "BlueLake", "--program", "opencode", "--model", "sonnet",
    ])
    .unwrap();
    assert_eq!(out["agent"]["name"], "BlueLake");

    let out = run(&["reserve", "take", "--agent", "BlueLake", "--path", "src/**"]).unwrap();
    assert_eq!(out["granted"].as_array().unwrap().len(), 1);

    let out = run(&["reserve", "check", "--path", "src/lib.rs", "--agent", "GreenCastle"]).unwrap();
    assert_eq!(out["conflicts"].as_array().unwrap().len(), 1);

    let out = run(&["events", "--latest"]).unwrap();
    assert_eq!(out["latest_sequence"], 2);

    let out = run(&["events", "--type", "file_reserved"]).unwrap();
    assert_eq!(out["events"].as_array().unwrap().len(), 1);

    let out = run(&["rebuild"]).unwrap();
    assert_eq!(out["replayed"], 2);

    let out = run(&["schema"]).unwrap();
    assert_eq!(out["subsystems"].as_array().unwrap().len(), 7);

    let err = run(&["agent", "get", "--name", "Nobody"]).unwrap_err();
    assert_eq!(err.kind(), "not_found");
    let envelope = hivelog::error_envelope(&err);
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["kind"], "not_found");
    assert_eq!(envelope["retryable_after_fix"], false);

    let err = run(&["events", "--type", "file_reserve"]).unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(err.to_string().contains("file_reserved"));
    assert_eq!(hivelog::error_envelope(&err)["retryable_after_fix"], true);

    let err = run(&["agent", "explode"]).unwrap_err();
    assert_eq!(err.kind(), "validation");
}
