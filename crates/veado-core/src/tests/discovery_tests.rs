//! Tests for instance discovery

use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use veado_types::{DEFAULT_INSTANCE_NAME, DEFAULT_INSTANCE_VERSION, Instance};

use super::fixtures::{make_registry, write_descriptor};
use crate::Error;
use crate::discovery::{DiscoveryEvent, DiscoveryWatcher};

const DESCRIPTOR: &str = r#"{"server":"127.0.0.1:40000","name":"mini","version":"2.1","time":1700000000}"#;

#[test]
fn test_new_descriptor_appears() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", DESCRIPTOR);

    let event = registry.process_file("abc");
    assert_eq!(
        event,
        Some(DiscoveryEvent::Appeared(Instance {
            id: "abc".to_string(),
            server: "127.0.0.1:40000".to_string(),
            name: "mini".to_string(),
            version: "2.1".to_string(),
        }))
    );
    assert!(registry.contains("abc"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_missing_fields_get_defaults() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", r#"{"server":"127.0.0.1:12345"}"#);

    let Some(DiscoveryEvent::Appeared(instance)) = registry.process_file("abc") else {
        panic!("expected Appeared");
    };
    assert_eq!(instance.name, DEFAULT_INSTANCE_NAME);
    assert_eq!(instance.version, DEFAULT_INSTANCE_VERSION);
}

#[test]
fn test_reprocessing_unchanged_descriptor_is_silent() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", DESCRIPTOR);

    assert!(registry.process_file("abc").is_some());
    assert_eq!(registry.process_file("abc"), None);
    assert_eq!(registry.process_file("abc"), None);
}

#[test]
fn test_server_change_is_update() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", DESCRIPTOR);
    registry.process_file("abc");

    write_descriptor(dir.path(), "abc", r#"{"server":"127.0.0.1:40001"}"#);
    let Some(DiscoveryEvent::Updated(instance)) = registry.process_file("abc") else {
        panic!("expected Updated");
    };
    assert_eq!(instance.server, "127.0.0.1:40001");
    assert_eq!(
        registry.get("abc").map(|i| i.server.as_str()),
        Some("127.0.0.1:40001")
    );
}

#[test]
fn test_name_only_change_is_ignored() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", DESCRIPTOR);
    registry.process_file("abc");

    write_descriptor(
        dir.path(),
        "abc",
        r#"{"server":"127.0.0.1:40000","name":"renamed"}"#,
    );
    assert_eq!(registry.process_file("abc"), None);
    assert_eq!(registry.get("abc").map(|i| i.name.as_str()), Some("mini"));
}

#[test]
fn test_empty_descriptor_is_ignored() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", "");

    assert_eq!(registry.process_file("abc"), None);
    assert!(registry.is_empty());
}

#[test]
fn test_partial_descriptor_is_ignored_until_complete() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", r#"{"server":"127.0"#);
    assert_eq!(registry.process_file("abc"), None);

    write_descriptor(dir.path(), "abc", r#"{"name":"mini"}"#);
    assert_eq!(registry.process_file("abc"), None);
    assert!(registry.is_empty());

    write_descriptor(dir.path(), "abc", DESCRIPTOR);
    assert!(matches!(
        registry.process_file("abc"),
        Some(DiscoveryEvent::Appeared(_))
    ));
}

#[test]
fn test_sloppy_descriptor_is_accepted() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", "{server:'127.0.0.1:8080'}");

    let Some(DiscoveryEvent::Appeared(instance)) = registry.process_file("abc") else {
        panic!("expected Appeared");
    };
    assert_eq!(instance.server, "127.0.0.1:8080");
}

#[test]
fn test_deleted_descriptor_is_gone_once() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", DESCRIPTOR);
    registry.process_file("abc");

    std::fs::remove_file(dir.path().join("abc")).unwrap();
    assert_eq!(
        registry.process_file("abc"),
        Some(DiscoveryEvent::Gone("abc".to_string()))
    );
    assert_eq!(registry.process_file("abc"), None);
    assert!(registry.is_empty());
}

#[test]
fn test_unknown_missing_file_is_silent() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    assert_eq!(registry.process_file("never-existed"), None);
}

#[test]
fn test_scan_reports_every_instance() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "one", r#"{"server":"127.0.0.1:1"}"#);
    write_descriptor(dir.path(), "two", r#"{"server":"127.0.0.1:2"}"#);
    write_descriptor(dir.path(), "junk", "");

    let mut ids: Vec<String> = registry
        .scan()
        .unwrap()
        .iter()
        .map(|e| e.instance_id().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["one", "two"]);

    assert!(registry.scan().unwrap().is_empty());
}

#[test]
fn test_scan_missing_dir_errors() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(&dir.path().join("missing"));
    assert!(matches!(registry.scan(), Err(Error::Io(_))));
}

#[test]
fn test_instance_id_from_filename() {
    let dir = TempDir::new().unwrap();
    let registry = make_registry(dir.path());
    assert_eq!(registry.instance_id("abc"), "abc");
    assert_eq!(registry.instance_id(" abc "), "abc");
    assert_eq!(registry.instance_id("12345"), "12345");
    assert_eq!(registry.instance_id("true"), "true");
}

#[test]
fn test_clear_forgets_instances() {
    let dir = TempDir::new().unwrap();
    let mut registry = make_registry(dir.path());
    write_descriptor(dir.path(), "abc", DESCRIPTOR);
    registry.process_file("abc");
    registry.clear();

    assert!(registry.is_empty());
    assert!(matches!(
        registry.process_file("abc"),
        Some(DiscoveryEvent::Appeared(_))
    ));
}

#[test]
fn test_watcher_requires_directory() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing");
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = DiscoveryWatcher::spawn(&missing, tx).unwrap_err();
    assert!(matches!(err, Error::InstancesDirNotFound(path) if path == missing));
}

#[tokio::test]
async fn test_watcher_forwards_file_names() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = DiscoveryWatcher::spawn(dir.path(), tx).unwrap();
    assert_eq!(watcher.dir(), dir.path());

    write_descriptor(dir.path(), "abc", DESCRIPTOR);

    let name = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no watcher event within timeout")
        .expect("watcher channel closed");
    assert_eq!(name, "abc");
}
