#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{path::PathBuf, time::Duration};

use pretty_assertions::assert_eq;
use relayq_spool::{BackingStore, FileBackingStore, NewMessage};

fn submission(subject: &str, content: &str) -> NewMessage {
    NewMessage {
        sender: "relay@example.com".to_string(),
        declared_sender: Some("u@x".to_string()),
        recipients: vec!["v@y".to_string(), "w@z".to_string()],
        subject: subject.to_string(),
        content: content.to_string(),
    }
}

fn store_in(dir: &tempfile::TempDir) -> FileBackingStore {
    let store = FileBackingStore::builder()
        .path(dir.path().join("spool"))
        .build()
        .expect("valid path");
    store.init().expect("init");
    store
}

#[test]
fn test_path_validation_rejects_parent_dir() {
    let result = FileBackingStore::builder()
        .path(PathBuf::from("/var/spool/../etc/passwd"))
        .build();

    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("cannot contain '..'")
    );
}

#[test]
fn test_path_validation_rejects_relative_paths() {
    let result = FileBackingStore::builder()
        .path(PathBuf::from("relative/path"))
        .build();

    assert!(result.unwrap_err().to_string().contains("must be absolute"));
}

#[test]
#[cfg(unix)]
fn test_path_validation_rejects_unix_system_directories() {
    for path in [
        "/etc/spool",
        "/bin/messages",
        "/sbin/mail",
        "/usr/bin/data",
        "/boot/spool",
        "/sys/messages",
        "/proc/mail",
        "/dev/spool",
    ] {
        let result = FileBackingStore::builder().path(path).build();

        assert!(
            result.unwrap_err().to_string().contains("system directory"),
            "Path {path} should be rejected as a system directory"
        );
    }
}

#[test]
fn test_init_rejects_regular_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"x").unwrap();

    let store = FileBackingStore::builder().path(&file).build().unwrap();
    assert!(store.init().unwrap_err().to_string().contains("not a directory"));
}

#[test]
fn test_init_removes_orphans() {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");
    std::fs::create_dir_all(&spool).unwrap();
    std::fs::write(spool.join("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin.deleted"), b"x").unwrap();
    std::fs::write(spool.join(".tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.eml"), b"x").unwrap();

    let store = FileBackingStore::builder().path(&spool).build().unwrap();
    store.init().unwrap();

    assert_eq!(std::fs::read_dir(&spool).unwrap().count(), 0);
}

#[tokio::test]
async fn test_insert_and_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let content = "Subject: Hi\r\n\r\nhello";
    let id = store.insert(submission("Hi", content)).await.unwrap();

    assert!(store.path().join(format!("{id}.eml")).is_file());
    assert!(store.path().join(format!("{id}.bin")).is_file());

    let message = store.read(&id).await.unwrap();
    assert_eq!(message.id, id);
    assert_eq!(message.content, content);
    assert_eq!(message.subject, "Hi");
    assert_eq!(message.envelope_from, "relay@example.com");
    assert_eq!(message.declared_from.as_deref(), Some("u@x"));
    assert_eq!(message.envelope_recipients, vec!["v@y", "w@z"]);
    assert_eq!(message.failure_count, 0);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let store = store_in(&dir);
        let id = store.insert(submission("a", "body")).await.unwrap();
        store.increment_failure(&id, "421 try later").await.unwrap();
        id
    };

    let reopened = store_in(&dir);
    let pending = reopened.fetch_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].failure_count, 1);
    assert_eq!(pending[0].last_error.as_deref(), Some("421 try later"));
}

#[tokio::test]
async fn test_fetch_pending_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(store.insert(submission(&i.to_string(), "x")).await.unwrap());
    }

    let pending: Vec<_> = store
        .fetch_pending(3)
        .await
        .unwrap()
        .into_iter()
        .map(|message| message.id)
        .collect();

    assert_eq!(pending, ids[..3].to_vec());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let id = store.insert(submission("a", "x")).await.unwrap();
    store.delete(&id).await.unwrap();
    store.delete(&id).await.unwrap();

    assert!(store.list().await.unwrap().is_empty());
    assert!(store.read(&id).await.unwrap_err().is_not_found());
    assert!(
        store
            .increment_failure(&id, "late")
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_sweep_removes_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let doomed = store.insert(submission("doomed", "x")).await.unwrap();
    let kept = store.insert(submission("kept", "x")).await.unwrap();
    for _ in 0..3 {
        store.increment_failure(&doomed, "refused").await.unwrap();
    }
    store.increment_failure(&kept, "refused").await.unwrap();

    let removed = store
        .sweep(Duration::from_secs(72 * 3600), 3)
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert_eq!(store.list().await.unwrap(), vec![kept]);
}

#[tokio::test]
async fn test_sweep_removes_expired() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    store.insert(submission("old", "x")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let removed = store.sweep(Duration::from_millis(1), 5).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_failures_are_counted() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let id = store.insert(submission("a", "x")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.increment_failure(&id, &format!("attempt {i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.read(&id).await.unwrap().failure_count, 10);
}

#[test]
fn test_init_removes_content_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");
    std::fs::create_dir_all(&spool).unwrap();
    std::fs::write(spool.join("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml"), b"half written").unwrap();
    std::fs::write(spool.join("01ARZ3NDEKTSV4RRFFQ69G5FAW.eml"), b"complete").unwrap();
    std::fs::write(spool.join("01ARZ3NDEKTSV4RRFFQ69G5FAW.bin"), b"meta").unwrap();

    let store = FileBackingStore::builder().path(&spool).build().unwrap();
    store.init().unwrap();

    assert!(!spool.join("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml").exists());
    assert!(spool.join("01ARZ3NDEKTSV4RRFFQ69G5FAW.eml").exists());
    assert!(spool.join("01ARZ3NDEKTSV4RRFFQ69G5FAW.bin").exists());
}

/// Writes an undecodable entry that sorts before anything inserted now
fn write_garbage_entry(store: &FileBackingStore) -> String {
    let id = ulid::Ulid::from_parts(1, 0).to_string();
    std::fs::write(store.path().join(format!("{id}.bin")), [0xff; 16]).unwrap();
    std::fs::write(store.path().join(format!("{id}.eml")), b"body").unwrap();
    id
}

#[tokio::test]
async fn test_unreadable_entry_does_not_block_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let good = store.insert(submission("good", "x")).await.unwrap();
    let bad = write_garbage_entry(&store);

    let pending = store.fetch_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, good);

    assert!(!store.path().join(format!("{bad}.bin")).exists());
    assert!(store.path().join(format!("{bad}.bin.corrupt")).exists());
    assert!(store.path().join(format!("{bad}.eml.corrupt")).exists());

    // Set aside for good: later ticks no longer see it
    assert_eq!(store.list().await.unwrap(), vec![good]);
    assert_eq!(store.fetch_pending(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreadable_entry_does_not_block_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let doomed = store.insert(submission("doomed", "x")).await.unwrap();
    store.increment_failure(&doomed, "refused").await.unwrap();
    let bad = write_garbage_entry(&store);

    let removed = store
        .sweep(Duration::from_secs(72 * 3600), 1)
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert!(store.list().await.unwrap().is_empty());
    assert!(store.path().join(format!("{bad}.bin.corrupt")).exists());
}
