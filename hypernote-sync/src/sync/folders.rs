use std::collections::HashMap;

use hypernote_drive::DriveError;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::remote::RemoteStore;

/// Find-or-create for the sync root and the folders under it. One resolver
/// lives for exactly one sync run; nothing is shared between runs.
pub struct FolderResolver<'a, R> {
    store: &'a R,
    root_name: String,
    root_id: OnceCell<String>,
    // relative dir ("a", "a/b") -> folder id
    folders: Mutex<HashMap<String, String>>,
}

impl<'a, R: RemoteStore> FolderResolver<'a, R> {
    pub fn new(store: &'a R, root_name: impl Into<String>) -> Self {
        Self {
            store,
            root_name: root_name.into(),
            root_id: OnceCell::new(),
            folders: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve_root(&self) -> Result<&str, DriveError> {
        let id = self
            .root_id
            .get_or_try_init(|| async {
                let id = self
                    .resolve_or_create(self.store.root_id(), &self.root_name)
                    .await?;
                info!(folder = %self.root_name, id = %id, "resolved remote sync folder");
                Ok::<_, DriveError>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    pub async fn resolve_or_create(&self, parent_id: &str, name: &str) -> Result<String, DriveError> {
        if let Some(id) = self.store.find_folder(parent_id, name).await? {
            return Ok(id);
        }
        let id = self.store.create_folder(parent_id, name).await?;
        debug!(parent = %parent_id, name = %name, id = %id, "created remote folder");
        Ok(id)
    }

    /// Returns the id of `relative_dir` under the sync root, creating each
    /// missing segment. Callers are serialized so a prefix is created at most
    /// once per run.
    pub async fn ensure_folder_chain(&self, relative_dir: &str) -> Result<String, DriveError> {
        let root_id = self.resolve_root().await?.to_string();
        if relative_dir.is_empty() {
            return Ok(root_id);
        }

        let mut folders = self.folders.lock().await;
        let mut parent_id = root_id;
        let mut prefix = String::new();
        for segment in relative_dir.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            parent_id = match folders.get(&prefix) {
                Some(id) => id.clone(),
                None => {
                    let id = self.resolve_or_create(&parent_id, segment).await?;
                    folders.insert(prefix.clone(), id.clone());
                    id
                }
            };
        }
        Ok(parent_id)
    }
}
