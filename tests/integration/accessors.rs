use std::collections::BTreeMap;

use pdm_store::ErrorKind;
use pdm_store::docs::{DocError, FileMetadata, NotificationKind, Settings};
use proptest::prelude::*;
use serde_json::{Value, json};

use crate::fixtures::git::{remote_json, remote_messages, remote_tip, seed_remote};
use crate::fixtures::{Rig, actor};

#[test]
fn lock_then_unlock_leaves_empty_document() {
    let rig = Rig::new();
    let store = rig.open("a");
    let alice = actor("alice");
    let locks = store.locks();

    let entry = locks.acquire("bracket.step", &alice, "editing").unwrap();
    assert_eq!(entry.user, "alice");
    assert!(locks.is_locked("bracket.step").unwrap());

    let released = locks.release("bracket.step", &alice).unwrap();
    assert_eq!(released, entry);
    assert!(!locks.is_locked("bracket.step").unwrap());

    assert_eq!(remote_json(rig.remote(), "locks.json"), Some(json!({})));
    assert_eq!(
        remote_messages(rig.remote()),
        vec![
            "App: Locks updated by alice".to_string(),
            "App: Locks updated by alice".to_string(),
        ]
    );
}

#[test]
fn lock_errors_map_to_distinct_kinds() {
    let rig = Rig::new();
    let store = rig.open("a");
    let (alice, bob) = (actor("alice"), actor("bob"));
    let locks = store.locks();

    locks.acquire("plate.step", &alice, "").unwrap();

    let taken = locks.acquire("plate.step", &bob, "").unwrap_err();
    assert!(matches!(&taken, DocError::AlreadyLocked { holder, .. } if holder == "alice"));
    assert_eq!(taken.kind(), ErrorKind::Conflict);

    let not_owner = locks.release("plate.step", &bob).unwrap_err();
    assert_eq!(not_owner.kind(), ErrorKind::Forbidden);

    let not_locked = locks.release("other.step", &alice).unwrap_err();
    assert_eq!(not_locked.kind(), ErrorKind::InvalidInput);

    // Only the successful acquire was committed.
    assert_eq!(remote_messages(rig.remote()).len(), 1);
}

#[test]
fn mis_shaped_entry_blocks_rewrite_instead_of_erasing_others() {
    let rig = Rig::new();
    let seeded = json!({
        "a.step": {"user": "bob", "message": "editing", "timestamp": "2024-01-01T00:00:00Z"},
        "b.step": {"owner": "carol"}
    });
    let tip = seed_remote(
        rig.remote(),
        &[("locks.json", seeded.to_string().as_bytes())],
        "outside edit",
    )
    .unwrap();
    let store = rig.open("a");
    let alice = actor("alice");

    let err = store.locks().acquire("c.step", &alice, "").unwrap_err();
    assert!(matches!(err, DocError::Unreadable { document: "Locks", .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::WriteFailed);

    // Reads still degrade to empty; the remote is untouched.
    assert!(store.locks().load().unwrap().is_empty());
    assert_eq!(remote_tip(rig.remote()), Some(tip));
    assert_eq!(remote_json(rig.remote(), "locks.json"), Some(seeded));
}

#[test]
fn corrupt_document_blocks_subscription_change() {
    let rig = Rig::new();
    let tip = seed_remote(rig.remote(), &[("subscriptions.json", b"{\"P-1\": [")], "bad").unwrap();
    let store = rig.open("a");

    let err = store
        .subscriptions()
        .subscribe("P-1", "alice", &actor("alice"))
        .unwrap_err();
    assert!(matches!(err, DocError::Unreadable { .. }), "{err}");
    assert_eq!(remote_tip(rig.remote()), Some(tip));
}

#[test]
fn invalid_settings_are_rejected_before_any_git_work() {
    let rig = Rig::new();
    let (store, transport) = rig.open_faulty("a");

    let settings = Settings {
        revision_separator: "  ".into(),
        ..Settings::default()
    };
    let err = store.settings().save(&settings, &actor("alice")).unwrap_err();

    assert!(matches!(err, DocError::Invalid { document: "Settings", .. }), "{err}");
    assert_eq!(transport.calls(), 0);
    assert!(!rig.clone_path("a").join("settings.json").exists());
}

#[test]
fn settings_default_until_written() {
    let rig = Rig::new();
    let store = rig.open("a");

    assert_eq!(store.settings().load().unwrap().revision_separator, "-");

    let mut settings = Settings::default();
    settings.revision_separator = ".".into();
    settings.extra.insert("theme".into(), Value::from("dark"));
    store.settings().save(&settings, &actor("admin")).unwrap();

    assert_eq!(store.settings().load().unwrap(), settings);
    assert_eq!(
        remote_json(rig.remote(), "settings.json"),
        Some(json!({"revision_separator": ".", "theme": "dark"}))
    );
}

#[test]
fn notifications_lifecycle() {
    let rig = Rig::new();
    let store = rig.open("a");
    let system = actor("system");
    let notifications = store.notifications();

    let first = notifications
        .notify("bob", NotificationKind::Checkout, "alice checked out plate.step", &system)
        .unwrap();
    notifications
        .notify("bob", NotificationKind::Info, "welcome", &system)
        .unwrap();
    assert_ne!(first.id, "");
    assert_eq!(notifications.unread("bob").unwrap().len(), 2);
    assert!(notifications.unread("carol").unwrap().is_empty());

    assert!(notifications.mark_read("bob", &first.id, &actor("bob")).unwrap());
    assert!(!notifications.mark_read("bob", &first.id, &actor("bob")).unwrap());
    assert_eq!(notifications.unread("bob").unwrap().len(), 1);

    let missing = notifications.mark_read("bob", "nope", &actor("bob")).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let raw = remote_json(rig.remote(), "notifications.json").unwrap();
    assert_eq!(raw["bob"][0]["type"], "checkout");
    assert_eq!(raw["bob"][0]["is_read"], true);
}

#[test]
fn subscriptions_skip_no_op_commits() {
    let rig = Rig::new();
    let store = rig.open("a");
    let alice = actor("alice");
    let subs = store.subscriptions();

    assert!(subs.subscribe("P-100", "alice", &alice).unwrap());
    assert!(!subs.subscribe("P-100", "alice", &alice).unwrap());
    assert!(subs.subscribe("P-100", "bob", &alice).unwrap());
    assert_eq!(subs.subscribers("P-100").unwrap(), vec!["alice", "bob"]);

    assert!(subs.unsubscribe("P-100", "alice", &alice).unwrap());
    assert!(!subs.unsubscribe("P-100", "alice", &alice).unwrap());
    assert!(!subs.unsubscribe("P-404", "alice", &alice).unwrap());

    assert_eq!(remote_messages(rig.remote()).len(), 3);
    assert_eq!(remote_json(rig.remote(), "subscriptions.json"), Some(json!({"P-100": ["bob"]})));
}

#[test]
fn audit_appends_attributed_events() {
    let rig = Rig::new();
    let store = rig.open("a");
    let admin = pdm_store::Actor::parse("root", "admin").unwrap();

    store
        .audit()
        .append("role_change", json!({"user": "bob", "role": "viewer"}), &admin)
        .unwrap();
    store.audit().append("create_part", json!({"part": "P-1"}), &admin).unwrap();

    let events = store.audit().load().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event, "role_change");
    assert_eq!(events[1].by, "root");
    assert_eq!(events[1].role, "admin");
    assert!(remote_json(rig.remote(), "audit.json").unwrap().is_array());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn metadata_survives_save_and_load(
        entries in prop::collection::btree_map("[a-z]{1,8}\\.step", "[ -~]{0,24}", 1..4)
    ) {
        let rig = Rig::new();
        let store = rig.open("a");
        let metadata: BTreeMap<String, FileMetadata> = entries
            .into_iter()
            .map(|(file, description)| {
                let meta = FileMetadata {
                    description,
                    author: "alice".into(),
                    revision: "A".into(),
                    ..FileMetadata::default()
                };
                (file, meta)
            })
            .collect();

        store.metadata().save(&metadata, &actor("alice")).unwrap();

        let other = rig.open("b");
        prop_assert_eq!(other.metadata().load().unwrap(), metadata);
    }
}
