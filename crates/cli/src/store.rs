//! Session persistence in a JSON file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use socialtodo_core::error::CoreError;
use socialtodo_core::session::{Session, SessionStore};

const APP_DIR: &str = "social-todo";
const SESSION_FILE: &str = "session.json";

/// Stores the bearer token and cached user in one JSON file.
///
/// A missing file means "signed out". A file that no longer parses is
/// treated the same way and logged.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/social-todo/session.json`, if the platform has a
    /// config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SESSION_FILE))
    }

    /// Use `path` when given, otherwise [`default_path`](Self::default_path).
    pub fn at_or_default(path: Option<PathBuf>) -> Result<Self, CoreError> {
        path.or_else(Self::default_path)
            .map(Self::new)
            .ok_or_else(|| {
                CoreError::Internal(
                    "no config directory; set SOCIAL_TODO_SESSION_FILE".to_string(),
                )
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<Option<Session>, CoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    fn save(&self, session: &Session) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::Internal(format!("creating {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| CoreError::Internal(format!("encoding session: {e}")))?;
        std::fs::write(&self.path, json)
            .map_err(|e| CoreError::Internal(format!("writing {}: {e}", self.path.display())))
    }

    fn clear(&self) -> Result<(), CoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Internal(format!(
                "removing {}: {e}",
                self.path.display()
            ))),
        }
    }
}
