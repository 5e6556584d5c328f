//! Restart behaviour with the file-backed stores.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::wait_for_state;
use sessionhub::application::persister::StatePersister;
use sessionhub::application::ports::{CredentialStore, SnapshotStore};
use sessionhub::application::registry::SessionRegistry;
use sessionhub::infrastructure::storage::credentials::FileCredentialStore;
use sessionhub::infrastructure::storage::snapshot::JsonSnapshotStore;
use sessionhub::infrastructure::transport::mock::MockTransport;
use sessionhub_core::{Payload, SendOutcome, SessionId, SessionPolicy, SessionState};
use tokio::sync::watch;
use tokio_test::assert_ok;

struct Stores {
    root: PathBuf,
    credentials: Arc<FileCredentialStore>,
    snapshots: Arc<JsonSnapshotStore>,
}

impl Stores {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("sessionhub-restart-{}", uuid::Uuid::new_v4()));
        Self {
            credentials: Arc::new(FileCredentialStore::new(root.join("credentials"))),
            snapshots: Arc::new(JsonSnapshotStore::new(root.join("state.json"))),
            root,
        }
    }

    fn registry(&self, transport: &MockTransport) -> SessionRegistry {
        SessionRegistry::new(
            SessionPolicy::default(),
            Arc::new(transport.clone()),
            self.credentials.clone(),
        )
    }

    async fn cleanup(self) {
        let _ = tokio::fs::remove_dir_all(&self.root).await;
    }
}

#[tokio::test]
async fn test_restart_restores_counters_and_reconnects_with_saved_credentials() {
    // Arrange – first run: pair and send two messages
    let stores = Stores::new();
    let id = SessionId::new("tenant-1");
    let first = MockTransport::new();
    let registry = stores.registry(&first);
    assert_ok!(registry.request_pairing(&id).await);
    assert!(first.complete_pairing(&id, b"paired-credentials"));
    wait_for_state(&registry, &id, SessionState::Connected).await;
    for body in ["one", "two"] {
        let outcome = registry.send_message(&id, "841234567", Payload::text(body)).await;
        assert_eq!(outcome, SendOutcome::Sent);
    }
    let persister = StatePersister::new(registry.clone(), stores.snapshots.clone());
    assert_eq!(assert_ok!(persister.persist_once().await), 1);
    registry.shutdown().await;

    // Act – second run against the same files
    let second = MockTransport::new();
    let registry = stores.registry(&second);
    let restored = StatePersister::new(registry.clone(), stores.snapshots.clone())
        .restore()
        .await;
    assert_ok!(registry.initialize(&id).await);
    let status = wait_for_state(&registry, &id, SessionState::Connected).await;

    // Assert
    assert_eq!(restored, 1);
    assert_eq!(status.stats.messages_sent, 2);
    assert_eq!(second.connect_count(&id), 1, "no pairing on the second run");
    let stored = assert_ok!(stores.credentials.load(&id).await);
    assert_eq!(stored.map(|c| c.as_bytes().to_vec()), Some(b"paired-credentials".to_vec()));

    registry.shutdown().await;
    stores.cleanup().await;
}

#[tokio::test]
async fn test_snapshot_file_holds_counters_but_no_credentials() {
    let stores = Stores::new();
    let id = SessionId::new("tenant-2");
    let transport = MockTransport::new();
    let registry = stores.registry(&transport);
    assert_ok!(registry.request_pairing(&id).await);
    assert!(transport.complete_pairing(&id, b"top-secret-blob"));
    wait_for_state(&registry, &id, SessionState::Connected).await;

    let persister = StatePersister::new(registry.clone(), stores.snapshots.clone());
    assert_ok!(persister.persist_once().await);

    let contents = assert_ok!(tokio::fs::read_to_string(stores.root.join("state.json")).await);
    assert!(contents.contains("tenant-2"));
    assert!(contents.contains("messages_sent"));
    assert!(!contents.contains("top-secret-blob"));

    registry.shutdown().await;
    stores.cleanup().await;
}

#[tokio::test]
async fn test_stopping_persister_writes_final_snapshot() {
    // Arrange
    let stores = Stores::new();
    let transport = MockTransport::new();
    let registry = stores.registry(&transport);
    assert_ok!(registry.initialize(&SessionId::new("a")).await);
    assert_ok!(registry.initialize(&SessionId::new("b")).await);
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = StatePersister::new(registry.clone(), stores.snapshots.clone()).spawn(stop_rx);

    // Act
    stop_tx.send_replace(true);
    assert_ok!(task.await);

    // Assert
    let document = assert_ok!(stores.snapshots.read().await).expect("snapshot written on stop");
    assert_eq!(document.sessions.len(), 2);

    registry.shutdown().await;
    stores.cleanup().await;
}

#[tokio::test]
async fn test_delete_removes_credentials_file() {
    let stores = Stores::new();
    let id = SessionId::new("tenant-3");
    let transport = MockTransport::new();
    let registry = stores.registry(&transport);
    assert_ok!(registry.request_pairing(&id).await);
    assert!(transport.complete_pairing(&id, b"blob"));
    wait_for_state(&registry, &id, SessionState::Connected).await;
    assert!(assert_ok!(stores.credentials.load(&id).await).is_some());

    assert_ok!(registry.delete(&id).await);

    assert!(assert_ok!(stores.credentials.load(&id).await).is_none());
    assert_eq!(transport.logout_count(&id), 1);

    registry.shutdown().await;
    stores.cleanup().await;
}
