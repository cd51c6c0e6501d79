use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay::{StateError, StateStore, Timestamp, Watermark};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// On-disk shape of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateRecord {
    #[serde(default)]
    last_checked: Option<Timestamp>,
}

/// [`StateStore`] backed by one JSON file.
///
/// Blocking filesystem work runs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load_blocking(&self) -> Result<Watermark, StateError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no state file yet, starting without a watermark");
                return Ok(Watermark::unset());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let record: StateRecord =
            serde_json::from_slice(&raw).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let watermark = record.last_checked.map_or_else(Watermark::unset, Watermark::at);
        debug!(path = %self.path.display(), ?watermark, "loaded watermark");
        Ok(watermark)
    }

    fn save_blocking(&self, watermark: Watermark) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                self.io_error(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "state path has no file name",
                ))
            })?;
        let tmp_path = dir.join(format!(".{file_name}.tmp"));

        let record = StateRecord {
            last_checked: watermark.get(),
        };
        let mut body = serde_json::to_vec(&record).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        body.push(b'\n');

        let write_tmp = || -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&body)?;
            file.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(self.io_error(e));
        }

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(self.io_error(e));
        }
        sync_dir(&dir).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), ?watermark, "watermark persisted");
        Ok(())
    }
}

/// Flushes the directory entry written by a rename.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::OpenOptions::new().read(true).open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn join_failure(path: &Path, err: tokio::task::JoinError) -> StateError {
    StateError::Io {
        path: path.to_path_buf(),
        source: io::Error::other(err),
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self) -> Result<Watermark, StateError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load_blocking())
            .await
            .map_err(|e| join_failure(&self.path, e))?
    }

    async fn save(&self, watermark: Watermark) -> Result<(), StateError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(watermark))
            .await
            .map_err(|e| join_failure(&self.path, e))?
    }
}
