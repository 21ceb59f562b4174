//! Durable signed-artifact marker
//!
//! When the wallet posts a signature, the endpoint also drops the artifact on
//! disk at `<state-dir>/signed-<session>.json`. The orchestrator polls for that
//! file, so the waiting side can live in a different process from the server.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::types::{HandoffError, Result, SignedArtifact};

/// Marker files for signed artifacts, one per session
#[derive(Debug, Clone)]
pub struct MarkerFile {
    dir: PathBuf,
}

impl MarkerFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Well-known location of a session's marker
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("signed-{}.json", session_id))
    }

    /// Write the artifact for a session.
    ///
    /// An existing marker is never overwritten. The content goes to a
    /// temporary file first and is renamed into place so readers never see a
    /// partial write.
    pub async fn write(&self, session_id: &str, artifact: &SignedArtifact) -> Result<PathBuf> {
        let path = self.path_for(session_id);
        if tokio::fs::try_exists(&path).await? {
            return Err(HandoffError::StateConflict(format!(
                "marker already present at {}",
                path.display()
            )));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self
            .dir
            .join(format!(".signed-{}.{}.tmp", session_id, uuid::Uuid::new_v4()));
        let body = serde_json::to_vec(artifact)?;
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(session = %session_id, path = %path.display(), "Signed artifact marker written");
        Ok(path)
    }

    /// Read the marker if present
    pub async fn read(&self, session_id: &str) -> Result<Option<SignedArtifact>> {
        let path = self.path_for(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => SignedArtifact::parse(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the marker after it has been consumed
    pub async fn consume(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(session = %session_id, "Marker consumed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_consume() {
        let dir = tempfile::tempdir().unwrap();
        let marker = MarkerFile::new(dir.path().join("state"));

        assert!(marker.read("sess_a").await.unwrap().is_none());

        let artifact = SignedArtifact::tx_hash("0xdeadbeef");
        let path = marker.write("sess_a", &artifact).await.unwrap();
        assert!(path.exists());
        assert_eq!(marker.read("sess_a").await.unwrap(), Some(artifact));

        marker.consume("sess_a").await.unwrap();
        assert!(!path.exists());
        assert!(marker.read("sess_a").await.unwrap().is_none());

        // Consuming twice is harmless
        marker.consume("sess_a").await.unwrap();
    }

    #[tokio::test]
    async fn test_second_write_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let marker = MarkerFile::new(dir.path());

        marker
            .write("sess_b", &SignedArtifact::tx_hash("0x01"))
            .await
            .unwrap();
        let err = marker
            .write("sess_b", &SignedArtifact::tx_hash("0x02"))
            .await
            .unwrap_err();

        assert!(matches!(err, HandoffError::StateConflict(_)));
        assert_eq!(
            marker.read("sess_b").await.unwrap(),
            Some(SignedArtifact::tx_hash("0x01"))
        );
    }

    #[tokio::test]
    async fn test_markers_are_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let marker = MarkerFile::new(dir.path());
        marker
            .write("sess_one", &SignedArtifact::tx_hash("0x01"))
            .await
            .unwrap();
        assert!(marker.read("sess_two").await.unwrap().is_none());
    }
}
