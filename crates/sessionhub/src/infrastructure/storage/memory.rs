//! In-memory credential and snapshot stores.
//!
//! Used by tests and by embedders that do not want anything on disk.  Both
//! are cheap to clone and share their contents between clones, so a test can
//! hand one clone to the registry and inspect the other.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sessionhub_core::{CredentialBlob, CredentialsRef, SessionId};
use tokio::sync::RwLock;

use crate::application::ports::{
    CredentialStore, CredentialStoreError, SnapshotDocument, SnapshotStore, SnapshotStoreError,
};

#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    entries: Arc<RwLock<HashMap<SessionId, Vec<u8>>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates credentials, as if a previous run had paired.
    pub async fn insert(&self, session_id: SessionId, bytes: Vec<u8>) {
        self.entries.write().await.insert(session_id, bytes);
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.entries.read().await.contains_key(session_id)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<CredentialsRef>, CredentialStoreError> {
        Ok(self
            .entries
            .read()
            .await
            .get(session_id)
            .map(|bytes| CredentialsRef::from(bytes.clone())))
    }

    async fn save(&self, session_id: &SessionId, blob: &CredentialBlob) -> Result<(), CredentialStoreError> {
        self.entries
            .write()
            .await
            .insert(session_id.clone(), blob.as_bytes().to_vec());
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), CredentialStoreError> {
        self.entries.write().await.remove(session_id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    document: Arc<RwLock<Option<SnapshotDocument>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last document written, if any.
    pub async fn latest(&self) -> Option<SnapshotDocument> {
        self.document.read().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn write(&self, document: &SnapshotDocument) -> Result<(), SnapshotStoreError> {
        *self.document.write().await = Some(document.clone());
        Ok(())
    }

    async fn read(&self) -> Result<Option<SnapshotDocument>, SnapshotStoreError> {
        Ok(self.document.read().await.clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
