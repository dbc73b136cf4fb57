use std::collections::{BTreeMap, VecDeque};

use hypernote_drive::DriveError;
use tracing::{debug, warn};

use super::paths::{is_hidden, is_valid_segment, join_relative};
use super::remote::{RemoteStore, parse_rfc3339_millis};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRecord {
    pub remote_id: String,
    pub relative_path: String,
    pub modified_at_millis: i64,
}

/// Lists `folder_id` and every folder below it, returning files keyed by
/// their path relative to `folder_id`. The first failed listing fails the
/// whole scan. Folders are walked breadth-first in listing order, so when
/// two siblings share a name the first one listed wins, matching the folder
/// lookup used for uploads.
pub async fn scan_remote_tree<R: RemoteStore>(
    store: &R,
    folder_id: &str,
) -> Result<BTreeMap<String, RemoteFileRecord>, DriveError> {
    let mut files = BTreeMap::new();
    let mut pending = VecDeque::from([(folder_id.to_string(), String::new())]);

    while let Some((folder, prefix)) = pending.pop_front() {
        let children = store.list_children(&folder).await?;
        debug!(folder = %folder, prefix = %prefix, count = children.len(), "listed remote folder");
        for child in children {
            if !is_valid_segment(&child.name) {
                warn!(id = %child.id, name = %child.name, "skipping remote entry with unusable name");
                continue;
            }
            // Same rule as the local scan.
            if is_hidden(&child.name) {
                debug!(id = %child.id, name = %child.name, "skipping hidden remote entry");
                continue;
            }
            let relative_path = join_relative(&prefix, &child.name);
            if child.is_folder {
                pending.push_back((child.id, relative_path));
                continue;
            }
            if files.contains_key(&relative_path) {
                warn!(path = %relative_path, id = %child.id, "ignoring duplicate remote file");
                continue;
            }
            let modified_at_millis = match child.modified_time.as_deref().and_then(parse_rfc3339_millis)
            {
                Some(millis) => millis,
                None => {
                    warn!(
                        path = %relative_path,
                        modified = ?child.modified_time,
                        "remote file has no usable modified time"
                    );
                    0
                }
            };
            files.insert(
                relative_path.clone(),
                RemoteFileRecord {
                    remote_id: child.id,
                    relative_path,
                    modified_at_millis,
                },
            );
        }
    }

    Ok(files)
}
