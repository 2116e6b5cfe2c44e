use hivelog::core::config::KernelConfig;
use hivelog::core::event_log::{self, EventFilter};
use hivelog::core::models::Milestone;
use hivelog::core::store::Store;
use hivelog::plugins::agents::{RegisterAgentParams, get_agent, register_agent};
use hivelog::plugins::checkpoint::{SaveCheckpointParams, list_checkpoints, save_checkpoint};
use hivelog::plugins::tasks::{
    ReportProgressParams, block_task, complete_task, report_progress, start_task,
};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const PROJECT: &str = "/work/repo";

fn progress<'a>(epic: Option<&'a str>, pct: u8, prev: Option<u8>) -> ReportProgressParams<'a> {
    ReportProgressParams {
        project_key: PROJECT,
        agent_name: "BlueLake",
        bead_id: "bead-1",
        epic_id: epic,
        progress_percent: pct,
        previous_percent: prev,
        message: None,
        files: Vec::new(),
    }
}

#[test]
fn test_crossing_a_milestone_writes_checkpoint() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let r = report_progress(&store, progress(Some("epic-1"), 10, None)).unwrap();
    assert!(r.checkpoint.is_none());

    let r = report_progress(&store, progress(Some("epic-1"), 30, Some(10))).unwrap();
    let ctx = r.checkpoint.unwrap();
    assert_eq!(ctx.progress_percent, 30);
    assert_eq!(ctx.last_milestone, Milestone::Quarter);

    let listed = list_checkpoints(&store, PROJECT, "epic-1").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].progress_percent, 30);

    // progress + checkpoint_created
    let types: Vec<&'static str> = event_log::read(&store, &EventFilter::for_project(PROJECT))
        .unwrap()
        .iter()
        .map(|e| e.kind.event_type())
        .collect();
    assert_eq!(
        types,
        vec!["task_progress", "task_progress", "checkpoint_created"]
    );
}

#[test]
fn test_same_bucket_does_not_checkpoint() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    report_progress(&store, progress(Some("epic-1"), 55, Some(40))).unwrap();
    // previous defaults to the stored 55
    let r = report_progress(&store, progress(Some("epic-1"), 70, None)).unwrap();
    assert!(r.checkpoint.is_none());
    let r = report_progress(&store, progress(Some("epic-1"), 100, None)).unwrap();
    assert!(r.checkpoint.is_none());

    let listed = list_checkpoints(&store, PROJECT, "epic-1").unwrap();
    assert_eq!(listed[0].progress_percent, 55);
}

#[test]
fn test_auto_checkpoint_carries_saved_context() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    save_checkpoint(
        &store,
        SaveCheckpointParams {
            project_key: PROJECT,
            epic_id: "epic-1",
            bead_id: "bead-1",
            agent_name: "BlueLake",
            files: vec!["src/auth.rs".to_string()],
            strategy: "feature-based",
            directives: vec!["no new deps".to_string()],
            progress_percent: 20,
        },
    )
    .unwrap();
    thread::sleep(Duration::from_millis(3));

    let ctx = report_progress(&store, progress(Some("epic-1"), 50, None))
        .unwrap()
        .checkpoint
        .unwrap();
    assert_eq!(ctx.files, vec!["src/auth.rs"]);
    assert_eq!(ctx.strategy, "feature-based");
    assert_eq!(ctx.directives, vec!["no new deps"]);
}

#[test]
fn test_progress_without_epic_never_checkpoints() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let r = report_progress(&store, progress(None, 80, Some(0))).unwrap();
    assert!(r.checkpoint.is_none());
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), 1);

    let err = report_progress(&store, progress(None, 120, None)).unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn test_block_requires_reason() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let err = block_task(&store, PROJECT, "BlueLake", "bead-1", "  ").unwrap_err();
    assert_eq!(err.kind(), "validation");
    let ev = block_task(&store, PROJECT, "BlueLake", "bead-1", "waiting on schema").unwrap();
    assert_eq!(ev.kind.event_type(), "task_blocked");
    assert_eq!(ev.sequence, 1);
}

#[test]
fn test_task_events_touch_the_agent() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let agent = register_agent(
        &store,
        RegisterAgentParams {
            project_key: PROJECT,
            name: "BlueLake",
            program: "opencode",
            model: "sonnet",
            task_description: None,
        },
    )
    .unwrap();
    thread::sleep(Duration::from_millis(3));

    let started = start_task(&store, PROJECT, "BlueLake", "bead-1", Some("epic-1")).unwrap();
    let after_start = get_agent(&store, PROJECT, "BlueLake").unwrap().unwrap();
    assert_eq!(after_start.last_active_at, started.timestamp);
    assert!(after_start.last_active_at > agent.last_active_at);

    thread::sleep(Duration::from_millis(3));
    let done = complete_task(&store, PROJECT, "BlueLake", "bead-1", Some("merged")).unwrap();
    let after_done = get_agent(&store, PROJECT, "BlueLake").unwrap().unwrap();
    assert_eq!(after_done.last_active_at, done.timestamp);
    assert_eq!(done.sequence, 3);
}
