//! Directory-backed credential store.
//!
//! One opaque file per session: `<dir>/<encoded id>.cred`.  Session ids are
//! caller-supplied, so every byte outside `[A-Za-z0-9_-]` is percent-encoded
//! before it becomes part of a path; `../etc` cannot escape the directory
//! and two distinct ids never share a file.
//!
//! Writes go to a sibling `.tmp` file first and are renamed into place, so a
//! crash mid-write leaves either the old blob or the new one.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sessionhub_core::{CredentialBlob, CredentialsRef, SessionId};

use crate::application::ports::{CredentialStore, CredentialStoreError};

pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.cred", encode_file_stem(session_id.as_str())))
    }
}

fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn io_error(path: &Path, source: std::io::Error) -> CredentialStoreError {
    CredentialStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<CredentialsRef>, CredentialStoreError> {
        let path = self.path_for(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(CredentialsRef::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn save(&self, session_id: &SessionId, blob: &CredentialBlob) -> Result<(), CredentialStoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let path = self.path_for(session_id);
        let tmp = path.with_extension("cred.tmp");
        tokio::fs::write(&tmp, blob.as_bytes())
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), CredentialStoreError> {
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
