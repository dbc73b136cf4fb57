use std::path::Path;

use futures_util::{StreamExt, stream};
use hypernote_drive::{DriveClient, DriveError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use crate::config::SyncSettings;

use super::folders::FolderResolver;
use super::local_scan::{ScanError, scan_local_tree};
use super::reconcile::{ActionKind, DEFAULT_TOLERANCE_MS, SyncAction, reconcile};
use super::remote::RemoteStore;
use super::remote_scan::scan_remote_tree;
use super::transfer::{TransferClient, TransferError};

pub const DEFAULT_ROOT_FOLDER_NAME: &str = "Hypernote";
pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("drive sync is not configured (no access token)")]
    NotConfigured,
    #[error("failed to create drive client: {0}")]
    Client(#[source] DriveError),
    #[error("failed to resolve remote sync folder: {0}")]
    Resolve(#[source] DriveError),
    #[error("local scan failed: {0}")]
    LocalScan(#[source] ScanError),
    #[error("remote scan failed: {0}")]
    RemoteScan(#[source] DriveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Resolving,
    Scanning,
    Reconciling,
    Uploading,
    Downloading,
    Done,
    Failed,
}

/// Outcome of one run. Paths appear in the order the reconciler emitted them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub downloaded: Vec<String>,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, action: SyncAction, result: Result<(), TransferError>) {
        let kind = action.kind();
        let path = match action {
            SyncAction::Upload { relative_path, .. } | SyncAction::Download { relative_path, .. } => {
                relative_path
            }
        };
        match (kind, result) {
            (ActionKind::Upload, Ok(())) => self.uploaded.push(path),
            (ActionKind::Download, Ok(())) => self.downloaded.push(path),
            (ActionKind::Upload, Err(err)) => {
                self.errors.push(format!("Upload failed: {path}: {err}"));
            }
            (ActionKind::Download, Err(err)) => {
                self.errors.push(format!("Download failed: {path}: {err}"));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub root_folder_name: String,
    pub tolerance_ms: i64,
    /// Transfers in flight within one pass.
    pub transfer_concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            root_folder_name: DEFAULT_ROOT_FOLDER_NAME.to_string(),
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            transfer_concurrency: DEFAULT_TRANSFER_CONCURRENCY,
        }
    }
}

pub struct SyncEngine<R> {
    store: R,
    settings: EngineSettings,
    transfer: TransferClient,
    run_lock: Mutex<()>,
    phase: watch::Sender<SyncPhase>,
}

impl SyncEngine<DriveClient> {
    pub fn from_settings(settings: &SyncSettings) -> Result<Self, EngineError> {
        let token = settings
            .require_token()
            .map_err(|_| EngineError::NotConfigured)?;
        let client = match settings.drive_base_url.as_deref() {
            Some(base_url) => DriveClient::with_base_url(base_url, token),
            None => DriveClient::new(token),
        }
        .map_err(EngineError::Client)?;
        Ok(Self::new(client, settings.engine_settings()))
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(store: R, settings: EngineSettings) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            store,
            settings,
            transfer: TransferClient::new(),
            run_lock: Mutex::new(()),
            phase,
        }
    }

    pub fn with_transfer(mut self, transfer: TransferClient) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Runs one full reconciliation of `local_root` against the remote sync
    /// folder. Per-file transfer failures end up in the report; only folder
    /// resolution and scan failures abort the run. Concurrent calls queue on
    /// the run lock.
    pub async fn sync(&self, local_root: &Path) -> Result<SyncReport, EngineError> {
        let _run = self.run_lock.lock().await;
        match self.run(local_root).await {
            Ok(report) => {
                self.enter(SyncPhase::Done);
                info!(
                    uploaded = report.uploaded.len(),
                    downloaded = report.downloaded.len(),
                    errors = report.errors.len(),
                    "sync complete"
                );
                Ok(report)
            }
            Err(err) => {
                self.enter(SyncPhase::Failed);
                error!(error = %err, "sync failed");
                Err(err)
            }
        }
    }

    async fn run(&self, local_root: &Path) -> Result<SyncReport, EngineError> {
        let folders = FolderResolver::new(&self.store, self.settings.root_folder_name.as_str());

        self.enter(SyncPhase::Resolving);
        let root_id = folders
            .resolve_root()
            .await
            .map_err(EngineError::Resolve)?
            .to_string();

        self.enter(SyncPhase::Scanning);
        let (local, remote) = tokio::try_join!(
            async {
                scan_local_tree(local_root)
                    .await
                    .map_err(EngineError::LocalScan)
            },
            async {
                scan_remote_tree(&self.store, &root_id)
                    .await
                    .map_err(EngineError::RemoteScan)
            },
        )?;
        info!(local = local.len(), remote = remote.len(), "scanned both trees");

        self.enter(SyncPhase::Reconciling);
        let (uploads, downloads): (Vec<_>, Vec<_>) =
            reconcile(&local, &remote, self.settings.tolerance_ms)
                .into_iter()
                .partition(|action| action.kind() == ActionKind::Upload);
        info!(
            uploads = uploads.len(),
            downloads = downloads.len(),
            "reconciled"
        );

        let mut report = SyncReport::default();
        self.enter(SyncPhase::Uploading);
        self.run_pass(&folders, local_root, uploads, &mut report).await;
        self.enter(SyncPhase::Downloading);
        self.run_pass(&folders, local_root, downloads, &mut report).await;
        Ok(report)
    }

    // `buffered` keeps results in action order whatever the completion order.
    async fn run_pass(
        &self,
        folders: &FolderResolver<'_, R>,
        local_root: &Path,
        actions: Vec<SyncAction>,
        report: &mut SyncReport,
    ) {
        let results: Vec<_> = stream::iter(actions)
            .map(|action| self.execute(folders, local_root, action))
            .buffered(self.settings.transfer_concurrency.max(1))
            .collect()
            .await;
        for (action, result) in results {
            if let Err(err) = &result {
                warn!(
                    path = %action.relative_path(),
                    kind = ?action.kind(),
                    error = %err,
                    "transfer failed"
                );
            }
            report.record(action, result);
        }
    }

    async fn execute(
        &self,
        folders: &FolderResolver<'_, R>,
        local_root: &Path,
        action: SyncAction,
    ) -> (SyncAction, Result<(), TransferError>) {
        let result = match &action {
            SyncAction::Upload {
                relative_path,
                existing_remote_id,
            } => self
                .transfer
                .upload(
                    &self.store,
                    folders,
                    local_root,
                    relative_path,
                    existing_remote_id.as_deref(),
                )
                .await
                .map(|_| ()),
            SyncAction::Download {
                relative_path,
                remote_id,
                remote_modified_at_millis,
            } => self
                .transfer
                .download(
                    &self.store,
                    local_root,
                    relative_path,
                    remote_id,
                    *remote_modified_at_millis,
                )
                .await
                .map(|_| ()),
        };
        (action, result)
    }

    fn enter(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
        info!(phase = ?phase, "sync phase");
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
