//! JSON file snapshot store.
//!
//! The whole snapshot is one pretty-printed JSON document.  It is written to
//! `<file>.tmp` and renamed over the target, so readers never observe a
//! half-written file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::application::ports::{SnapshotDocument, SnapshotStore, SnapshotStoreError};

pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(path: &Path, source: std::io::Error) -> SnapshotStoreError {
        SnapshotStoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn write(&self, document: &SnapshotDocument) -> Result<(), SnapshotStoreError> {
        let json = serde_json::to_vec_pretty(document)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Self::io_error(dir, e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Self::io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Self::io_error(&self.path, e))
    }

    async fn read(&self) -> Result<Option<SnapshotDocument>, SnapshotStoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(&self.path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SnapshotStoreError::Parse {
                path: self.path.clone(),
                source,
            })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
