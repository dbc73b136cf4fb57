use std::{
    env,
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use filetime::FileTime;
use futures_util::{StreamExt, TryStreamExt};
use hypernote_drive::{ByteStream, DriveError};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::backoff::Backoff;
use super::folders::FolderResolver;
use super::local_scan::system_time_to_millis;
use super::paths::{PathError, local_path_for, split_parent};
use super::remote::RemoteStore;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Drive(#[from] DriveError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Drive(err) if err.is_retryable())
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransferError::Drive(err) => err.retry_after_secs().map(Duration::from_secs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
    /// Total tries for one transfer, including the first.
    pub max_attempts: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_concurrency: read_limit("HYPERNOTE_DOWNLOAD_CONCURRENCY", 4),
            upload_concurrency: read_limit("HYPERNOTE_UPLOAD_CONCURRENCY", 2),
            max_attempts: 3,
        }
    }
}

pub struct TransferClient {
    download_limit: Arc<Semaphore>,
    upload_limit: Arc<Semaphore>,
    backoff: Backoff,
    max_attempts: u32,
}

impl TransferClient {
    pub fn new() -> Self {
        Self::with_config(TransferConfig::default())
    }

    pub fn with_config(config: TransferConfig) -> Self {
        Self {
            download_limit: Arc::new(Semaphore::new(config.download_concurrency.max(1))),
            upload_limit: Arc::new(Semaphore::new(config.upload_concurrency.max(1))),
            backoff: Backoff::default(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Pushes `relative_path` under `local_root` to the drive, creating the
    /// remote parent folders first. The remote modified time is set to the
    /// local file's mtime at the moment of upload. Returns the remote id.
    pub async fn upload<R: RemoteStore>(
        &self,
        store: &R,
        folders: &FolderResolver<'_, R>,
        local_root: &Path,
        relative_path: &str,
        existing_remote_id: Option<&str>,
    ) -> Result<String, TransferError> {
        let source = local_path_for(local_root, relative_path)?;
        let (dir, name) = split_parent(relative_path);
        let parent_id = folders.ensure_folder_chain(dir).await?;
        let source = source.as_path();
        let parent_id = parent_id.as_str();

        self.with_retries(relative_path, move || {
            self.upload_once(store, source, parent_id, name, existing_remote_id)
        })
        .await
    }

    /// Streams the remote file into place and stamps it with the remote mtime.
    /// Content lands in a hidden `.partial` sibling first, so an existing
    /// note is never truncated by a failed transfer.
    pub async fn download<R: RemoteStore>(
        &self,
        store: &R,
        local_root: &Path,
        relative_path: &str,
        remote_id: &str,
        remote_modified_at_millis: i64,
    ) -> Result<PathBuf, TransferError> {
        let target = local_path_for(local_root, relative_path)?;
        let target_ref = target.as_path();
        self.with_retries(relative_path, move || {
            self.download_once(store, target_ref, remote_id, remote_modified_at_millis)
        })
        .await?;
        Ok(target)
    }

    async fn upload_once<R: RemoteStore>(
        &self,
        store: &R,
        source: &Path,
        parent_id: &str,
        name: &str,
        existing_remote_id: Option<&str>,
    ) -> Result<String, TransferError> {
        let _permit = self
            .upload_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        let modified = tokio::fs::metadata(source).await?.modified()?;
        let modified_at_millis = system_time_to_millis(modified);
        let file = tokio::fs::File::open(source).await?;
        let body: ByteStream = ReaderStream::new(file).map_err(DriveError::from).boxed();

        match existing_remote_id {
            Some(id) => {
                store.update_file(id, modified_at_millis, body).await?;
                Ok(id.to_string())
            }
            None => Ok(store
                .create_file(parent_id, name, modified_at_millis, body)
                .await?),
        }
    }

    async fn download_once<R: RemoteStore>(
        &self,
        store: &R,
        target: &Path,
        remote_id: &str,
        remote_modified_at_millis: i64,
    ) -> Result<(), TransferError> {
        let _permit = self
            .download_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = store.get_file_content(remote_id).await?;
        let partial = partial_path(target);

        if let Err(err) = write_partial(&partial, content, remote_modified_at_millis).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        tokio::fs::rename(&partial, target).await?;
        Ok(())
    }

    async fn with_retries<T, F, Fut>(&self, relative_path: &str, mut op: F) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.delay_for(attempt, err.retry_after());
                    warn!(
                        path = %relative_path,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient transfer failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for TransferClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_partial(
    partial: &Path,
    mut content: ByteStream,
    modified_at_millis: i64,
) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0usize;
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let stamp = file_time_from_millis(modified_at_millis);
    let path = partial.to_path_buf();
    tokio::task::spawn_blocking(move || filetime::set_file_times(&path, stamp, stamp))
        .await
        .map_err(io::Error::other)??;
    debug!(path = %partial.display(), bytes = written, "wrote download");
    Ok(())
}

/// `notes/x.md` -> `notes/.x.md.partial`; the dot keeps it out of local scans.
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.partial"))
}

fn file_time_from_millis(millis: i64) -> FileTime {
    let seconds = millis.div_euclid(1000);
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    FileTime::from_unix_time(seconds, nanos)
}

fn read_limit(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
