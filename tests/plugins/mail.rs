use hivelog::core::config::KernelConfig;
use hivelog::core::event_log;
use hivelog::core::models::Importance;
use hivelog::core::store::Store;
use hivelog::plugins::mail::{
    InboxOptions, SendMessageParams, acknowledge, get_inbox, get_message, get_thread, mark_read,
    send_message,
};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const PROJECT: &str = "/work/repo";

fn send(
    store: &Store,
    from: &str,
    to: &[&str],
    subject: &str,
    thread_id: Option<&str>,
    importance: Importance,
) -> hivelog::core::models::Message {
    let to: Vec<String> = to.iter().map(|s| s.to_string()).collect();
    send_message(
        store,
        SendMessageParams {
            project_key: PROJECT,
            from_agent: from,
            to: &to,
            subject,
            body: "see the diff",
            thread_id,
            importance,
            ack_required: false,
        },
    )
    .unwrap()
}

#[test]
fn test_send_creates_one_message_and_recipient_rows() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let msg = send(
        &store,
        "BlueLake",
        &["GreenCastle", "RedStone", "GreenCastle"],
        "auth is mine",
        None,
        Importance::High,
    );

    assert_eq!(get_message(&store, PROJECT, &msg.id).unwrap().unwrap(), msg);
    for agent in ["GreenCastle", "RedStone"] {
        let inbox = get_inbox(&store, PROJECT, agent, &InboxOptions::default()).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message_id, msg.id);
        assert!(inbox[0].read_at.is_none());
    }
    assert!(
        get_inbox(&store, PROJECT, "BlueLake", &InboxOptions::default())
            .unwrap()
            .is_empty()
    );
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), 1);
}

#[test]
fn test_inbox_filters_and_ordering() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let first = send(&store, "A", &["B"], "one", None, Importance::Normal);
    thread::sleep(Duration::from_millis(3));
    let second = send(&store, "A", &["B"], "two", None, Importance::Urgent);
    thread::sleep(Duration::from_millis(3));
    let third = send(&store, "A", &["B"], "three", None, Importance::Low);

    let all = get_inbox(&store, PROJECT, "B", &InboxOptions::default()).unwrap();
    let ids: Vec<&str> = all.iter().map(|e| e.message_id.as_str()).collect();
    assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);
    assert!(all.iter().all(|e| e.body.is_none()));

    let urgent = get_inbox(
        &store,
        PROJECT,
        "B",
        &InboxOptions {
            urgent_only: true,
            include_bodies: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(urgent.len(), 1);
    assert_eq!(urgent[0].message_id, second.id);
    assert_eq!(urgent[0].body.as_deref(), Some("see the diff"));

    mark_read(&store, PROJECT, "B", &third.id).unwrap();
    let unread = get_inbox(
        &store,
        PROJECT,
        "B",
        &InboxOptions {
            unread_only: true,
            limit: Some(1),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].message_id, second.id);
}

#[test]
fn test_first_read_wins_and_ack_implies_read() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    let msg = send(&store, "A", &["B", "C"], "review", None, Importance::Normal);

    let first = mark_read(&store, PROJECT, "B", &msg.id).unwrap();
    thread::sleep(Duration::from_millis(3));
    let again = mark_read(&store, PROJECT, "B", &msg.id).unwrap();
    assert_eq!(first.read_at, again.read_at);

    let acked = acknowledge(&store, PROJECT, "C", &msg.id).unwrap();
    assert!(acked.acked_at.is_some());
    assert_eq!(acked.read_at, acked.acked_at);

    // per-recipient: B's ack state is untouched by C's ack
    let b = get_inbox(&store, PROJECT, "B", &InboxOptions::default()).unwrap();
    assert!(b[0].acked_at.is_none());
}

#[test]
fn test_receipt_for_non_recipient_is_not_found() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();
    let msg = send(&store, "A", &["B"], "hi", None, Importance::Normal);

    let err = mark_read(&store, PROJECT, "Z", &msg.id).unwrap_err();
    assert_eq!(err.kind(), "not_found");
    let err = acknowledge(&store, PROJECT, "B", "no-such-message").unwrap_err();
    assert_eq!(err.kind(), "not_found");
    assert_eq!(event_log::latest_sequence(&store, Some(PROJECT)).unwrap(), 1);
}

#[test]
fn test_thread_is_oldest_first_and_scoped() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let a = send(&store, "A", &["B"], "q", Some("t-1"), Importance::Normal);
    thread::sleep(Duration::from_millis(3));
    send(&store, "A", &["B"], "other", Some("t-2"), Importance::Normal);
    thread::sleep(Duration::from_millis(3));
    let b = send(&store, "B", &["A"], "re: q", Some("t-1"), Importance::Normal);

    let thread_msgs = get_thread(&store, PROJECT, "t-1").unwrap();
    assert_eq!(thread_msgs, vec![a, b]);
    assert!(get_thread(&store, "/elsewhere", "t-1").unwrap().is_empty());
}

#[test]
fn test_send_validation() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path(), KernelConfig::default()).unwrap();

    let err = send_message(
        &store,
        SendMessageParams {
            project_key: PROJECT,
            from_agent: "A",
            to: &[],
            subject: "hi",
            body: "",
            thread_id: None,
            importance: Importance::Normal,
            ack_required: false,
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let to = vec!["B".to_string()];
    let err = send_message(
        &store,
        SendMessageParams {
            project_key: PROJECT,
            from_agent: "A",
            to: &to,
            subject: "   ",
            body: "",
            thread_id: None,
            importance: Importance::Normal,
            ack_required: false,
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(event_log::latest_sequence(&store, None).unwrap(), 0);
}
