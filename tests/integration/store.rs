use pdm_store::store::{DocStatus, Freshness, StoreError};
use pdm_store::{ErrorKind, Mapping, WriteOutcome};
use serde_json::{Value, json};

use crate::fixtures::git::{remote_json, remote_messages, remote_tip, seed_remote};
use crate::fixtures::logs::capture;
use crate::fixtures::{Rig, actor};

fn mapping(value: Value) -> Mapping {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn empty_remote_reads_as_empty_documents() {
    let rig = Rig::new();
    let store = rig.open("a");

    let snapshot = store.read_snapshot("locks.json").unwrap();
    assert_eq!(snapshot.status, DocStatus::Missing);
    assert_eq!(snapshot.freshness, Freshness::Fresh);
    assert!(snapshot.head.is_none());
    assert!(store.read("locks.json").unwrap().is_empty());
}

#[test]
fn write_reaches_remote_and_other_clones() {
    let rig = Rig::new();
    let a = rig.open("a");
    let b = rig.open("b");
    let content = mapping(json!({"P-100": {"description": "Bracket", "current_rev": "A"}}));

    let outcome = a
        .write("parts.json", &content, "App: Parts updated by alice", &actor("alice"))
        .unwrap();
    let info = outcome.commit().expect("committed");

    assert_eq!(remote_tip(rig.remote()).map(|o| o.to_string()), Some(info.hash.clone()));
    assert_eq!(remote_json(rig.remote(), "parts.json"), Some(Value::Object(content.clone())));
    assert_eq!(b.read("parts.json").unwrap(), content);
    assert_eq!(
        b.read_snapshot("parts.json").unwrap().head.as_deref(),
        Some(info.hash.as_str())
    );
}

#[test]
fn batch_is_one_commit() {
    let rig = Rig::new();
    let store = rig.open("a");

    let outcome = store
        .write_batch(
            &[
                ("parts.json", json!({"P-1": {"description": "Plate"}})),
                ("audit.json", json!([{"event": "create_part", "by": "alice"}])),
            ],
            "App: Parts updated by alice",
            &actor("alice"),
        )
        .unwrap();

    let info = outcome.commit().unwrap();
    assert_eq!(info.paths, vec!["parts.json", "audit.json"]);
    assert_eq!(remote_messages(rig.remote()), vec!["App: Parts updated by alice"]);
    let audit = store.read_snapshot("audit.json").unwrap();
    assert!(audit.content.is_array());
    // A list document has no mapping view.
    assert!(audit.into_mapping().is_empty());
}

#[test]
fn rewriting_identical_content_is_unchanged() {
    let rig = Rig::new();
    let store = rig.open("a");
    let content = mapping(json!({"revision_separator": "."}));
    let alice = actor("alice");

    store.write("settings.json", &content, "first", &alice).unwrap();
    let again = store.write("settings.json", &content, "second", &alice).unwrap();

    assert_eq!(again, WriteOutcome::Unchanged);
    assert_eq!(remote_messages(rig.remote()), vec!["first"]);
}

#[test]
fn corrupt_document_reads_empty_with_warning() {
    let rig = Rig::new();
    seed_remote(rig.remote(), &[("locks.json", b"{not json")], "broken").unwrap();
    let store = rig.open("a");

    let (snapshot, logs) = capture(|| store.read_snapshot("locks.json").unwrap());

    assert_eq!(snapshot.status, DocStatus::Corrupt);
    assert!(snapshot.into_mapping().is_empty());
    let warnings = logs.warnings();
    assert!(
        warnings.iter().any(|r| r.field("path") == Some("locks.json")),
        "expected a warning naming the corrupt path, got {warnings:?}"
    );
}

#[test]
fn transient_fetch_failure_is_retried_once() {
    let rig = Rig::new();
    let (store, transport) = rig.open_faulty("a");
    seed_remote(rig.remote(), &[("parts.json", br#"{"P-7": {}}"#)], "outside").unwrap();

    transport.fail_fetches(1);
    let snapshot = store.read_snapshot("parts.json").unwrap();

    assert_eq!(snapshot.freshness, Freshness::Fresh);
    assert_eq!(transport.fetch_calls(), 2);
    assert!(snapshot.into_mapping().contains_key("P-7"));
}

#[test]
fn persistent_fetch_failure_serves_stale_local_content() {
    let rig = Rig::new();
    seed_remote(rig.remote(), &[("parts.json", br#"{"P-1": {}}"#)], "v1").unwrap();
    let (store, transport) = rig.open_faulty("a");
    seed_remote(rig.remote(), &[("parts.json", br#"{"P-2": {}}"#)], "v2").unwrap();

    transport.fail_fetches(2);
    let (snapshot, logs) = capture(|| store.read_snapshot("parts.json").unwrap());

    assert_eq!(snapshot.freshness, Freshness::Stale);
    assert_eq!(transport.fetch_calls(), 2);
    assert!(snapshot.into_mapping().contains_key("P-1"));
    assert!(!logs.warnings().is_empty());

    // Once the remote is reachable again the next read catches up.
    let fresh = store.read_snapshot("parts.json").unwrap();
    assert_eq!(fresh.freshness, Freshness::Fresh);
    assert!(fresh.into_mapping().contains_key("P-2"));
}

#[test]
fn invalid_paths_never_touch_the_remote() {
    let rig = Rig::new();
    let (store, transport) = rig.open_faulty("a");

    for bad in ["../escape.json", "/etc/passwd", ".git/config", ""] {
        let err = store
            .write(bad, &Mapping::new(), "m", &actor("alice"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }), "{bad:?}: {err}");
        assert_eq!(pdm_store::Error::from(err).kind(), ErrorKind::InvalidInput);
    }
    assert!(store.read("../escape.json").is_err());
    assert_eq!(transport.calls(), 0);
}

#[test]
fn reopening_an_existing_clone_keeps_its_content() {
    let rig = Rig::new();
    {
        let store = rig.open("a");
        store
            .write("roles.json", &mapping(json!({"alice": "admin"})), "m", &actor("alice"))
            .unwrap();
    }
    let store = rig.open("a");
    assert_eq!(store.read("roles.json").unwrap(), mapping(json!({"alice": "admin"})));
}
