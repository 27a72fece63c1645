//! Post-order filesystem walk that builds the work list for indexing.
//!
//! The walk is a single explicit-stack DFS (no recursion, so depth is bounded
//! only by available memory) that visits every directory twice: once to push
//! its children, once — after all children are on the result list — to push
//! itself. That ordering is what lets `sink-index` compute each directory's
//! digest purely from already-computed child digests.
//!
//! A path already `completed` in the store is memoized: it and everything
//! under it are left off the work list entirely, since their digests are
//! already on record. Permission errors on a directory are recorded and that
//! subtree is skipped rather than aborting the whole walk.

use std::fs;
use std::path::{Path, PathBuf};

use sink_store::{IndexStore, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraversalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] sink_store::StoreError),
}

pub type TraversalResult<T> = Result<T, TraversalError>;

/// Outcome of a single [`mark`] call.
#[derive(Debug, Default)]
pub struct MarkResult {
    /// Paths to hash/combine, in post-order: every directory follows all of
    /// its descendants.
    pub marked: Vec<PathBuf>,
    /// Paths skipped due to a permission error, not descended into.
    pub skipped: Vec<PathBuf>,
}

/// One node on the explicit DFS stack.
enum Frame {
    /// Not yet expanded: look up its children (if a directory) first.
    Enter(PathBuf),
    /// Already expanded: safe to emit now that children are emitted.
    Leave(PathBuf),
}

/// Walks `root` post-order, skipping paths already `completed` in `store`,
/// the store's own database file, and any path whose basename is in
/// `ignore_names`.
pub fn mark(
    store: &IndexStore,
    root: &Path,
    ignore_names: &[String],
) -> TraversalResult<MarkResult> {
    let mut result = MarkResult::default();
    let mut stack = vec![Frame::Enter(root.to_path_buf())];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(path) => {
                if should_skip(store, &path, ignore_names) {
                    continue;
                }

                let metadata = match fs::symlink_metadata(&path) {
                    Ok(m) => m,
                    Err(e) if is_permission_denied(&e) => {
                        log::warn!("permission denied reading metadata: {}", path.display());
                        result.skipped.push(path);
                        continue;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        // Vanished between its parent's read_dir and this visit
                        // (or was handed in directly as a root that doesn't
                        // exist). Not a failure of the walk, just one node
                        // that no longer has anything to mark.
                        log::debug!("path no longer exists, skipping: {}", path.display());
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                if path_already_completed(store, &path)? {
                    continue;
                }

                // Symlinks are recorded as leaves; they are never followed.
                if metadata.is_dir() && !metadata.file_type().is_symlink() {
                    stack.push(Frame::Leave(path.clone()));
                    match read_children(&path) {
                        Ok(children) => {
                            for child in children {
                                stack.push(Frame::Enter(child));
                            }
                        }
                        Err(e) if is_permission_denied(&e) => {
                            log::warn!("permission denied listing directory: {}", path.display());
                            // Already pushed Leave(path); pop it back off so
                            // an unreadable directory isn't marked for
                            // indexing with no children enumerated.
                            stack.pop();
                            result.skipped.push(path);
                        }
                        Err(e) => return Err(e.into()),
                    }
                } else {
                    result.marked.push(path);
                }
            }
            Frame::Leave(path) => {
                result.marked.push(path);
            }
        }
    }

    Ok(result)
}

fn read_children(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        children.push(entry?.path());
    }
    Ok(children)
}

fn should_skip(store: &IndexStore, path: &Path, ignore_names: &[String]) -> bool {
    if store.is_own_file(path) {
        return true;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => ignore_names.iter().any(|ignored| ignored == name),
        None => false,
    }
}

fn path_already_completed(store: &IndexStore, path: &Path) -> TraversalResult<bool> {
    let key = path.to_string_lossy();
    Ok(store.exists(&key, Status::Completed)?)
}

fn is_permission_denied(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::PermissionDenied
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn temp_store() -> (IndexStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("sink.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn marks_files_before_their_parent_directory() {
        let (store, dir) = temp_store();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        File::create(root.join("a.txt")).unwrap();
        File::create(root.join("b.txt")).unwrap();

        let result = mark(&store, &root, &[]).unwrap();
        let root_pos = result.marked.iter().position(|p| p == &root).unwrap();
        for name in ["a.txt", "b.txt"] {
            let child_pos = result.marked.iter().position(|p| p == &root.join(name)).unwrap();
            assert!(child_pos < root_pos, "{name} should be marked before its parent");
        }
    }

    #[test]
    fn skips_ignored_basenames() {
        let (store, dir) = temp_store();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::create_dir(root.join("sink-quarantine")).unwrap();
        File::create(root.join("keep.txt")).unwrap();

        let result = mark(&store, &root, &["sink-quarantine".to_string()]).unwrap();
        assert!(!result.marked.iter().any(|p| p.ends_with("sink-quarantine")));
        assert!(result.marked.iter().any(|p| p.ends_with("keep.txt")));
    }

    #[test]
    fn skips_paths_already_completed_in_the_store() {
        let (store, dir) = temp_store();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        File::create(root.join("done.txt")).unwrap();
        File::create(root.join("pending.txt")).unwrap();

        let report = store.new_report(None).unwrap();
        store
            .upsert(&sink_store::PathRecord {
                path: root.join("done.txt").to_string_lossy().to_string(),
                digest: "already-hashed".to_string(),
                is_dir: false,
                count: 1,
                size: 1,
                mtime: 0.0,
                status: Status::Completed,
                report_id: report,
            })
            .unwrap();

        let result = mark(&store, &root, &[]).unwrap();
        assert!(!result.marked.iter().any(|p| p.ends_with("done.txt")));
        assert!(result.marked.iter().any(|p| p.ends_with("pending.txt")));
    }

    #[test]
    fn a_path_that_fails_to_exist_at_query_time_is_skipped_not_fatal() {
        let (store, dir) = temp_store();
        let root = dir.path().join("does-not-exist");

        let result = mark(&store, &root, &[]).unwrap();
        assert!(result.marked.is_empty());
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn excludes_the_stores_own_database_file() {
        let (store, dir) = temp_store();
        let result = mark(&store, dir.path(), &[]).unwrap();
        assert!(!result.marked.iter().any(|p| p == store.db_path()));
    }
}
