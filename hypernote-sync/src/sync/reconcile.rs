use std::collections::BTreeMap;

use super::local_scan::LocalFileRecord;
use super::remote_scan::RemoteFileRecord;

/// Two timestamps closer than this are the same version.
pub const DEFAULT_TOLERANCE_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Upload,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Upload {
        relative_path: String,
        /// Set when the remote object exists and is updated in place.
        existing_remote_id: Option<String>,
    },
    Download {
        relative_path: String,
        remote_id: String,
        remote_modified_at_millis: i64,
    },
}

impl SyncAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            SyncAction::Upload { .. } => ActionKind::Upload,
            SyncAction::Download { .. } => ActionKind::Download,
        }
    }

    pub fn relative_path(&self) -> &str {
        match self {
            SyncAction::Upload { relative_path, .. } | SyncAction::Download { relative_path, .. } => {
                relative_path
            }
        }
    }
}

/// Compares one local and one remote snapshot. Each direction is decided on
/// its own; uploads come first, each group in path order.
pub fn reconcile(
    local: &BTreeMap<String, LocalFileRecord>,
    remote: &BTreeMap<String, RemoteFileRecord>,
    tolerance_ms: i64,
) -> Vec<SyncAction> {
    let mut actions = Vec::new();

    for (path, local_file) in local {
        let remote_file = remote.get(path);
        let upload = match remote_file {
            None => true,
            Some(remote_file) => is_newer(
                local_file.modified_at_millis,
                remote_file.modified_at_millis,
                tolerance_ms,
            ),
        };
        if upload {
            actions.push(SyncAction::Upload {
                relative_path: path.clone(),
                existing_remote_id: remote_file.map(|r| r.remote_id.clone()),
            });
        }
    }

    for (path, remote_file) in remote {
        let download = match local.get(path) {
            None => true,
            Some(local_file) => is_newer(
                remote_file.modified_at_millis,
                local_file.modified_at_millis,
                tolerance_ms,
            ),
        };
        if download {
            actions.push(SyncAction::Download {
                relative_path: path.clone(),
                remote_id: remote_file.remote_id.clone(),
                remote_modified_at_millis: remote_file.modified_at_millis,
            });
        }
    }

    actions
}

// Strictly greater, so a difference of exactly `tolerance_ms` is in sync.
fn is_newer(candidate: i64, other: i64, tolerance_ms: i64) -> bool {
    candidate > other.saturating_add(tolerance_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn local(entries: &[(&str, i64)]) -> BTreeMap<String, LocalFileRecord> {
        entries
            .iter()
            .map(|(path, millis)| {
                (
                    path.to_string(),
                    LocalFileRecord {
                        relative_path: path.to_string(),
                        absolute_path: PathBuf::from("/notes").join(path),
                        modified_at_millis: *millis,
                    },
                )
            })
            .collect()
    }

    fn remote(entries: &[(&str, i64)]) -> BTreeMap<String, RemoteFileRecord> {
        entries
            .iter()
            .map(|(path, millis)| {
                (
                    path.to_string(),
                    RemoteFileRecord {
                        remote_id: format!("id-{path}"),
                        relative_path: path.to_string(),
                        modified_at_millis: *millis,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn local_only_files_are_created_remotely() {
        let actions = reconcile(&local(&[("a.md", 10)]), &remote(&[]), DEFAULT_TOLERANCE_MS);
        assert_eq!(
            actions,
            vec![SyncAction::Upload {
                relative_path: "a.md".into(),
                existing_remote_id: None,
            }]
        );
    }

    #[test]
    fn remote_only_files_are_downloaded() {
        let actions = reconcile(&local(&[]), &remote(&[("a.md", 10)]), DEFAULT_TOLERANCE_MS);
        assert_eq!(
            actions,
            vec![SyncAction::Download {
                relative_path: "a.md".into(),
                remote_id: "id-a.md".into(),
                remote_modified_at_millis: 10,
            }]
        );
    }

    #[test]
    fn newer_local_file_updates_existing_remote_object() {
        let actions = reconcile(
            &local(&[("a.md", 5_000)]),
            &remote(&[("a.md", 3_000)]),
            DEFAULT_TOLERANCE_MS,
        );
        assert_eq!(
            actions,
            vec![SyncAction::Upload {
                relative_path: "a.md".into(),
                existing_remote_id: Some("id-a.md".into()),
            }]
        );
    }

    #[test]
    fn newer_remote_file_is_downloaded() {
        let actions = reconcile(
            &local(&[("a.md", 3_000)]),
            &remote(&[("a.md", 5_000)]),
            DEFAULT_TOLERANCE_MS,
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind(), ActionKind::Download);
    }

    #[test]
    fn differences_within_tolerance_are_in_sync() {
        let actions = reconcile(
            &local(&[("a.md", 10_000), ("b.md", 10_999), ("c.md", 10_000)]),
            &remote(&[("a.md", 10_999), ("b.md", 10_000), ("c.md", 10_000)]),
            DEFAULT_TOLERANCE_MS,
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn exact_tolerance_boundary_is_in_sync() {
        let actions = reconcile(
            &local(&[("a.md", 11_000)]),
            &remote(&[("a.md", 10_000)]),
            DEFAULT_TOLERANCE_MS,
        );
        assert!(actions.is_empty());

        let actions = reconcile(
            &local(&[("a.md", 11_001)]),
            &remote(&[("a.md", 10_000)]),
            DEFAULT_TOLERANCE_MS,
        );
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn uploads_precede_downloads_in_path_order() {
        let actions = reconcile(
            &local(&[("z.md", 1), ("b.md", 1)]),
            &remote(&[("y.md", 1), ("a.md", 1)]),
            DEFAULT_TOLERANCE_MS,
        );
        let order: Vec<_> = actions
            .iter()
            .map(|a| (a.kind(), a.relative_path()))
            .collect();
        assert_eq!(
            order,
            vec![
                (ActionKind::Upload, "b.md"),
                (ActionKind::Upload, "z.md"),
                (ActionKind::Download, "a.md"),
                (ActionKind::Download, "y.md"),
            ]
        );
    }

    #[test]
    fn negative_tolerance_flags_both_directions() {
        // A clock anomaly can make both sides look newer; nothing guards it.
        let actions = reconcile(&local(&[("a.md", 100)]), &remote(&[("a.md", 100)]), -1);
        let kinds: Vec<_> = actions.iter().map(SyncAction::kind).collect();
        assert_eq!(kinds, vec![ActionKind::Upload, ActionKind::Download]);
    }

    #[test]
    fn zero_tolerance_compares_exact_times() {
        let actions = reconcile(&local(&[("a.md", 101)]), &remote(&[("a.md", 100)]), 0);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind(), ActionKind::Upload);
    }
}
