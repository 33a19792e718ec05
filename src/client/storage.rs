use super::ClientError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// What the client keeps between runs.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub refresh_token_expires: Option<DateTime<Utc>>,
}

impl StoredSession {
    /// An unknown expiry is left for the server to judge.
    pub fn refresh_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.refresh_token_expires, Some(expires) if now >= expires)
    }
}

pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<Option<StoredSession>, ClientError>;
    fn save(&self, session: &StoredSession) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    session: Mutex<Option<StoredSession>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: StoredSession) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<Option<StoredSession>, ClientError> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &StoredSession) -> Result<(), ClientError> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// JSON file storage. Writes go to a sibling temp file that is renamed into
/// place, so a crash never leaves a half-written session behind.
///
/// The file is read once; afterwards the session is served from memory and
/// every change is written through. One process owns the file at a time.
#[derive(Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
    /// `None` until the file has been read.
    cached: Mutex<Option<Option<StoredSession>>>,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    fn read_file(&self) -> Result<Option<StoredSession>, ClientError> {
        match std::fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw).map(Some).map_err(storage_err),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn storage_err(e: impl std::fmt::Display) -> ClientError {
    ClientError::Storage(e.to_string())
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Result<Option<StoredSession>, ClientError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }
        let session = self.read_file()?;
        *cached = Some(session.clone());
        Ok(session)
    }

    fn save(&self, session: &StoredSession) -> Result<(), ClientError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(storage_err)?;
        }
        let raw = serde_json::to_vec_pretty(session).map_err(storage_err)?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, raw).map_err(storage_err)?;
        std::fs::rename(&tmp, &self.path).map_err(storage_err)?;
        *cached = Some(Some(session.clone()));
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(storage_err(e)),
        }
        *cached = Some(None);
        Ok(())
    }
}
