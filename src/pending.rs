//! The pending-response marker.
//!
//! A single file whose existence means "a reply is owed" and whose content is
//! the chat id to route it to. The webhook side writes it, the external
//! reply-sender reads it, replies, and deletes it. The two sides live in
//! different processes, so the file itself is the only synchronization: writes
//! land with an atomic rename and deletes tolerate a missing file.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PendingError {
    #[error("pending marker I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pending marker {path} holds an unreadable chat id: {content:?}")]
    Corrupt { path: PathBuf, content: String },
}

#[derive(Debug, Clone)]
pub struct PendingCoordinator {
    path: PathBuf,
}

impl PendingCoordinator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> PendingError {
        PendingError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Record that a reply is owed to `chat_id`, replacing any existing marker.
    pub fn set(&self, chat_id: i64) -> Result<(), PendingError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| self.io_err(e))?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| self.io_err(e))?;
        temp.write_all(chat_id.to_string().as_bytes())
            .map_err(|e| self.io_err(e))?;
        temp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        temp.persist(&self.path).map_err(|e| self.io_err(e.error))?;

        debug!(path = %self.path.display(), "Pending marker set");
        Ok(())
    }

    /// Remove the marker. Returns whether one was present.
    pub fn clear(&self) -> Result<bool, PendingError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Pending marker cleared");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// The chat id a reply is currently owed to, if any.
    pub fn peek(&self) -> Result<Option<i64>, PendingError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        content
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PendingError::Corrupt {
                path: self.path.clone(),
                content,
            })
    }

    /// Existence check that does not care about the content.
    pub fn is_pending(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> (tempfile::TempDir, PendingCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let pending = PendingCoordinator::new(dir.path().join("state").join("pending"));
        (dir, pending)
    }

    #[test]
    fn test_set_then_peek() {
        let (_dir, pending) = coordinator();
        assert_eq!(pending.peek().unwrap(), None);
        pending.set(-100123).unwrap();
        assert_eq!(pending.peek().unwrap(), Some(-100123));
        assert!(pending.is_pending());
    }

    #[test]
    fn test_second_set_overwrites() {
        let (dir, pending) = coordinator();
        pending.set(1).unwrap();
        pending.set(2).unwrap();
        assert_eq!(pending.peek().unwrap(), Some(2));
        // No stray temp files next to the marker.
        let entries = std::fs::read_dir(dir.path().join("state")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_dir, pending) = coordinator();
        pending.set(7).unwrap();
        assert!(pending.clear().unwrap());
        assert!(!pending.clear().unwrap());
        assert_eq!(pending.peek().unwrap(), None);
        assert!(!pending.is_pending());
    }

    #[test]
    fn test_corrupt_marker_is_reported() {
        let (_dir, pending) = coordinator();
        std::fs::create_dir_all(pending.path().parent().unwrap()).unwrap();
        std::fs::write(pending.path(), "not a chat").unwrap();
        assert!(matches!(pending.peek(), Err(PendingError::Corrupt { .. })));
        assert!(pending.is_pending());
    }
}
