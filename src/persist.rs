//! Crash-safe JSON state files.
//!
//! Writes go to `<path>.tmp`, are synced, then renamed over `<path>`. A
//! process killed at any point leaves `<path>` as either the previous or the
//! new complete document.

use crate::error::{PregenError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Write attempts before a persistence error is surfaced.
pub const WRITE_ATTEMPTS: u32 = 3;

const RETRY_PAUSE: Duration = Duration::from_millis(200);

/// Side file used while writing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Serialize `value` and atomically replace `path` with it.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;

    let mut attempt = 1;
    loop {
        match write_once(path, &json).await {
            Ok(()) => return Ok(()),
            Err(source) if attempt < WRITE_ATTEMPTS => {
                warn!(
                    path = %path.display(),
                    attempt,
                    error = %source,
                    "State write failed, retrying"
                );
                attempt += 1;
                tokio::time::sleep(RETRY_PAUSE).await;
            }
            Err(source) => {
                return Err(PregenError::Persist {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
}

async fn write_once(path: &Path, json: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(json).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await
}

/// Read and decode `path`.
///
/// A missing file is `Ok(None)`; unreadable or undecodable files are errors.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PregenError::InputFileRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PregenError::StateFileParse {
            path: path.to_path_buf(),
            source,
        })
}

/// Delete `path` if it exists.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(PregenError::Persist {
            path: path.to_path_buf(),
            source,
        }),
    }
}
