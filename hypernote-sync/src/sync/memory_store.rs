use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use futures_util::{StreamExt, TryStreamExt, stream};
use hypernote_drive::{ByteStream, Bytes, DriveError};
use reqwest::StatusCode;

use super::paths::split_parent;
use super::remote::{RemoteEntry, RemoteStore, millis_to_rfc3339};

/// In-memory drive used by the engine tests.
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub id: String,
    pub parent: String,
    pub name: String,
    pub is_folder: bool,
    pub modified_at_millis: i64,
    pub content: Vec<u8>,
    pub trashed: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    nodes: Vec<MemoryNode>,
    failing_listings: HashSet<String>,
    failing_lookups: bool,
    failing_uploads: HashMap<String, Option<u32>>,
    failing_downloads: HashSet<String>,
    folders_created: u32,
    upload_attempts: HashMap<String, u32>,
}

impl State {
    fn insert(
        &mut self,
        parent: &str,
        name: &str,
        is_folder: bool,
        modified_at_millis: i64,
        content: Vec<u8>,
    ) -> String {
        self.next_id += 1;
        let id = format!("{}-{}", if is_folder { "folder" } else { "file" }, self.next_id);
        self.nodes.push(MemoryNode {
            id: id.clone(),
            parent: parent.to_string(),
            name: name.to_string(),
            is_folder,
            modified_at_millis,
            content,
            trashed: false,
        });
        id
    }

    fn live_children<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a MemoryNode> + 'a {
        self.nodes
            .iter()
            .filter(move |node| node.parent == parent && !node.trashed)
    }

    // `None` means the upload fails every time; `Some(n)` fails the next n attempts.
    fn check_upload(&mut self, name: &str) -> Result<(), DriveError> {
        *self.upload_attempts.entry(name.to_string()).or_default() += 1;
        match self.failing_uploads.get_mut(name) {
            Some(None) => Err(api_error(StatusCode::BAD_REQUEST)),
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(api_error(StatusCode::SERVICE_UNAVAILABLE))
            }
            _ => Ok(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn add_folder(&self, parent: &str, name: &str) -> String {
        self.lock().insert(parent, name, true, 0, Vec::new())
    }

    pub fn add_file(&self, parent: &str, name: &str, modified_at_millis: i64, content: &[u8]) -> String {
        self.lock()
            .insert(parent, name, false, modified_at_millis, content.to_vec())
    }

    pub fn trash(&self, id: &str) {
        if let Some(node) = self.lock().nodes.iter_mut().find(|node| node.id == id) {
            node.trashed = true;
        }
    }

    pub fn fail_listing(&self, folder_id: &str) {
        self.lock().failing_listings.insert(folder_id.to_string());
    }

    pub fn fail_folder_lookups(&self) {
        self.lock().failing_lookups = true;
    }

    pub fn fail_uploads_of(&self, name: &str) {
        self.lock().failing_uploads.insert(name.to_string(), None);
    }

    pub fn fail_uploads_transiently(&self, name: &str, times: u32) {
        self.lock()
            .failing_uploads
            .insert(name.to_string(), Some(times));
    }

    pub fn fail_downloads_of(&self, file_id: &str) {
        self.lock().failing_downloads.insert(file_id.to_string());
    }

    pub fn folders_created(&self) -> u32 {
        self.lock().folders_created
    }

    pub fn upload_attempts(&self, name: &str) -> u32 {
        self.lock().upload_attempts.get(name).copied().unwrap_or(0)
    }

    pub fn live_folders_named(&self, name: &str) -> usize {
        self.lock()
            .nodes
            .iter()
            .filter(|node| node.is_folder && !node.trashed && node.name == name)
            .count()
    }

    /// Looks up a live node by `/`-separated path below `folder_id`.
    pub fn node_at(&self, folder_id: &str, relative_path: &str) -> Option<MemoryNode> {
        let state = self.lock();
        let (dir, name) = split_parent(relative_path);
        let mut parent = folder_id.to_string();
        for segment in dir.split('/').filter(|segment| !segment.is_empty()) {
            let next = state
                .live_children(&parent)
                .find(|node| node.is_folder && node.name == segment)?
                .id
                .clone();
            parent = next;
        }
        state
            .live_children(&parent)
            .find(|node| node.name == name)
            .cloned()
    }

    pub fn root_folder(&self, name: &str) -> Option<String> {
        let state = self.lock();
        state
            .live_children("root")
            .find(|node| node.is_folder && node.name == name)
            .map(|node| node.id.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl RemoteStore for MemoryStore {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>, DriveError> {
        let state = self.lock();
        if state.failing_listings.contains(folder_id) {
            return Err(api_error(StatusCode::FORBIDDEN));
        }
        Ok(state
            .live_children(folder_id)
            .map(|node| RemoteEntry {
                id: node.id.clone(),
                name: node.name.clone(),
                is_folder: node.is_folder,
                modified_time: millis_to_rfc3339(node.modified_at_millis).ok(),
            })
            .collect())
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>, DriveError> {
        let state = self.lock();
        if state.failing_lookups {
            return Err(api_error(StatusCode::UNAUTHORIZED));
        }
        Ok(state
            .live_children(parent_id)
            .find(|node| node.is_folder && node.name == name)
            .map(|node| node.id.clone()))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, DriveError> {
        let mut state = self.lock();
        state.folders_created += 1;
        Ok(state.insert(parent_id, name, true, 0, Vec::new()))
    }

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        modified_at_millis: i64,
        content: ByteStream,
    ) -> Result<String, DriveError> {
        self.lock().check_upload(name)?;
        let data = collect(content).await?;
        let mut state = self.lock();
        if parent_id != "root" && !state.nodes.iter().any(|node| node.id == parent_id) {
            return Err(api_error(StatusCode::NOT_FOUND));
        }
        Ok(state.insert(parent_id, name, false, modified_at_millis, data))
    }

    async fn update_file(
        &self,
        file_id: &str,
        modified_at_millis: i64,
        content: ByteStream,
    ) -> Result<(), DriveError> {
        let name = {
            let state = self.lock();
            state
                .nodes
                .iter()
                .find(|node| node.id == file_id && !node.is_folder)
                .map(|node| node.name.clone())
        }
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND))?;
        self.lock().check_upload(&name)?;
        let data = collect(content).await?;
        let mut state = self.lock();
        let node = state
            .nodes
            .iter_mut()
            .find(|node| node.id == file_id)
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND))?;
        node.content = data;
        node.modified_at_millis = modified_at_millis;
        Ok(())
    }

    async fn get_file_content(&self, file_id: &str) -> Result<ByteStream, DriveError> {
        let state = self.lock();
        if state.failing_downloads.contains(file_id) {
            return Err(api_error(StatusCode::NOT_FOUND));
        }
        let node = state
            .nodes
            .iter()
            .find(|node| node.id == file_id && !node.is_folder)
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND))?;
        let chunks: Vec<Result<Bytes, DriveError>> = node
            .content
            .chunks(4)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

async fn collect(content: ByteStream) -> Result<Vec<u8>, DriveError> {
    let chunks: Vec<Bytes> = content.try_collect().await?;
    Ok(chunks.concat())
}

fn api_error(status: StatusCode) -> DriveError {
    DriveError::Api {
        status,
        body: format!("memory store: {status}"),
        retry_after_secs: None,
    }
}
