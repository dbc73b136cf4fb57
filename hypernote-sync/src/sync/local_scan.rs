use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, warn};

use super::paths::{is_hidden, is_valid_segment, join_relative};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub modified_at_millis: i64,
}

/// Walks `root` and returns every regular, non-hidden file keyed by its
/// `/`-separated path relative to `root`. Any unreadable directory fails the
/// whole scan.
pub async fn scan_local_tree(root: &Path) -> Result<BTreeMap<String, LocalFileRecord>, ScanError> {
    let mut files = BTreeMap::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|source| ScanError::Io {
            path: dir.clone(),
            source,
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|source| ScanError::Io {
            path: dir.clone(),
            source,
        })? {
            let absolute_path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %absolute_path.display(), "skipping entry with non UTF-8 name");
                continue;
            };
            if is_hidden(&name) {
                continue;
            }
            if !is_valid_segment(&name) {
                warn!(path = %absolute_path.display(), "skipping entry with unusable name");
                continue;
            }
            let file_type = entry.file_type().await.map_err(|source| ScanError::Io {
                path: absolute_path.clone(),
                source,
            })?;
            let relative_path = join_relative(&prefix, &name);

            if file_type.is_dir() {
                pending.push((absolute_path, relative_path));
            } else if file_type.is_file() {
                let meta = entry.metadata().await.map_err(|source| ScanError::Io {
                    path: absolute_path.clone(),
                    source,
                })?;
                let modified = meta.modified().map_err(|source| ScanError::Io {
                    path: absolute_path.clone(),
                    source,
                })?;
                files.insert(
                    relative_path.clone(),
                    LocalFileRecord {
                        relative_path,
                        absolute_path,
                        modified_at_millis: system_time_to_millis(modified),
                    },
                );
            } else {
                debug!(path = %absolute_path.display(), "skipping non-regular entry");
            }
        }
    }

    Ok(files)
}

pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}
