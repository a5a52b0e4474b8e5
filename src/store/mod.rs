//! Durable JSON state store.
//!
//! One JSON document per service, loaded fully at startup and rewritten
//! atomically (write-to-temp-file + rename) after every mutation. A missing
//! or unparsable file resets to empty collections instead of failing startup.
//!
//! Mutations are serialized behind a single async lock so concurrent
//! read-modify-write cycles cannot drop each other's changes.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Single-writer store for one JSON state document.
#[derive(Debug)]
pub struct StateStore<T> {
    path: PathBuf,
    state: Mutex<T>,
}

impl<T> StateStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Load the document from disk, resetting to `T::default()` when the file
    /// is missing or unparsable.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        "state file {} is unparsable ({}), starting empty",
                        path.display(),
                        e
                    );
                    T::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("state file {} not found, starting empty", path.display());
                T::default()
            }
            Err(e) => {
                warn!(
                    "failed to read state file {} ({}), starting empty",
                    path.display(),
                    e
                );
                T::default()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Read from the document without persisting.
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }

    /// Mutate the document and persist it before releasing the writer lock.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut state = self.state.lock().await;
        let result = f(&mut state);
        persist(&self.path, &*state).await?;
        Ok(result)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write the full document to a temp file and atomically rename it into place.
async fn persist<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(state).context("serializing state document")?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating state directory {}", parent.display()))?;
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json)
        .await
        .with_context(|| format!("writing state temp file {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming state file into {}", path.display()))?;

    Ok(())
}
