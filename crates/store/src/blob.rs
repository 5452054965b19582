//! Content-addressed proof object store
//!
//! Filesystem-backed stand-in for object storage. Objects live under the
//! store root at their full key path with a JSON metadata sidecar carrying
//! the proof hash. Reads validate key ownership before touching the disk:
//! a foreign or malformed key is `NotFound`, never `Forbidden`, so callers
//! cannot probe for other users' documents.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempo_core::error::{CoreError, CoreResult};
use tempo_core::proof::validate_proof_key;
use tempo_core::types::UserId;

/// Metadata stored alongside each proof object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofMetadata {
    pub proof_hash: String,
}

/// Filesystem-backed proof store
#[derive(Debug, Clone)]
pub struct ProofStore {
    root: PathBuf,
}

impl ProofStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.meta.json"))
    }

    /// Store a rendered proof document under its key.
    ///
    /// Writes are atomic: content lands in a temporary sibling first and is
    /// renamed into place.
    pub async fn put(&self, key: &str, bytes: &[u8], proof_hash: &str) -> CoreResult<()> {
        let path = self.object_path(key);
        let parent = path
            .parent()
            .ok_or_else(|| CoreError::InvalidArgument("invalid proof key".to_string()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(CoreError::internal)?;

        atomic_write(&path, bytes).await?;

        let metadata = serde_json::to_vec(&ProofMetadata {
            proof_hash: proof_hash.to_string(),
        })?;
        atomic_write(&self.metadata_path(key), &metadata).await?;

        tracing::debug!(key, "stored proof document");
        Ok(())
    }

    /// Fetch a proof document and its metadata for the owning user.
    pub async fn get(&self, user_id: UserId, key: &str) -> CoreResult<(Vec<u8>, ProofMetadata)> {
        validate_proof_key(user_id, key)?;

        let not_found = || CoreError::NotFound("proof not found".to_string());
        let bytes = tokio::fs::read(self.object_path(key))
            .await
            .map_err(|_| not_found())?;
        let metadata_bytes = tokio::fs::read(self.metadata_path(key))
            .await
            .map_err(|_| not_found())?;
        let metadata: ProofMetadata =
            serde_json::from_slice(&metadata_bytes).map_err(|_| not_found())?;

        Ok((bytes, metadata))
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(CoreError::internal)?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(CoreError::internal)?;
    Ok(())
}
