//! Turns candidate duplicate groups (plain lists of absolute paths) into a
//! concrete quarantine plan: which member of each group to keep, where the
//! rest get moved, and a JSON manifest recording the move so it can be
//! inspected or undone by hand.
//!
//! The planner takes groups of paths, not an index lookup: it stats each
//! path directly to learn its size for ordering, since by the time
//! `quarantine` runs the candidate paths still exist on disk and nothing
//! here needs the index database.
//!
//! Move application is a plain `fs::rename` per path: there is no
//! transactional rollback if the process dies partway through, so the
//! manifest is written before any renames happen and is the source of
//! truth for what has already moved.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuarantineError {
    #[error("io error moving {path}: {source}")]
    Move { path: PathBuf, source: std::io::Error },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde_json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type QuarantineResult<T> = Result<T, QuarantineError>;

/// Decides, within one duplicate cluster, which member to keep. Comparison
/// is ascending: the first path after sorting is the keeper.
pub trait KeeperOrdering {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

/// The default keeper preference. A path containing `"old"` anywhere in its
/// name is pushed to the *end* of the order, since a path someone already
/// labeled "old" is the one that should be quarantined, not kept. Ties then
/// break on shallower nesting, a shorter basename, a shorter full path, and
/// finally basename text, in that order.
pub struct DefaultOrdering;

impl KeeperOrdering for DefaultOrdering {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        sort_key(a).cmp(&sort_key(b))
    }
}

fn sort_key(path: &str) -> (bool, usize, usize, usize, String) {
    let p = Path::new(path);
    let looks_old = path.to_lowercase().contains("old");
    let depth = p.ancestors().count();
    let basename_str = basename(path);
    (looks_old, depth, basename_str.len(), path.len(), basename_str)
}

fn basename(path: &str) -> String {
    Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or(path).to_string()
}

/// Size used purely to rank groups by how much quarantining them would
/// recover. A path that no longer stats (already moved, already deleted)
/// logs a warning and contributes zero rather than failing the whole plan.
fn path_size(path: &str) -> u64 {
    match fs::symlink_metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            log::warn!("could not stat {path} while ordering groups: {err}");
            0
        }
    }
}

/// A complete, ready-to-apply quarantine decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinePlan {
    #[serde(rename = "base-path")]
    pub base_path: String,
    pub timestamp: DateTime<Utc>,
    /// quarantined basename -> original absolute path.
    pub quarantine: BTreeMap<String, String>,
    /// Each duplicate group's members, keeper first.
    pub groups: Vec<Vec<String>>,
}

/// Builds a plan: within each group, sort members by `ordering` and keep the
/// first; queue the rest for quarantine. Groups are then ordered by keeper
/// size descending, so the biggest win is listed first. A group whose
/// keeper has vanished from disk since the candidates file was written
/// sorts as size zero rather than aborting the whole plan.
pub fn plan(
    groups: &[Vec<String>],
    ordering: &dyn KeeperOrdering,
    base_path: &Path,
    timestamp: DateTime<Utc>,
) -> QuarantinePlan {
    let mut ordered_groups: Vec<Vec<String>> = groups
        .iter()
        .map(|group| {
            let mut paths = group.clone();
            paths.sort_by(|a, b| ordering.compare(a, b));
            paths
        })
        .collect();

    ordered_groups.sort_by(|a, b| path_size(&b[0]).cmp(&path_size(&a[0])));

    let mut quarantine = BTreeMap::new();
    let mut used_names: BTreeMap<String, u32> = BTreeMap::new();

    for group in &ordered_groups {
        for original in group.iter().skip(1) {
            let target_name = unique_target_name(original, &mut used_names);
            quarantine.insert(target_name, original.clone());
        }
    }

    QuarantinePlan {
        base_path: base_path.to_string_lossy().to_string(),
        timestamp,
        quarantine,
        groups: ordered_groups,
    }
}

/// Picks a collision-free basename for `original` under the quarantine
/// directory, appending ` (k)` before the extension when the plain
/// basename is already taken.
fn unique_target_name(original: &str, used: &mut BTreeMap<String, u32>) -> String {
    let path = Path::new(original);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file").to_string();
    let ext = path.extension().and_then(|s| s.to_str()).map(|s| format!(".{s}")).unwrap_or_default();
    let plain = format!("{stem}{ext}");

    let count = used.entry(plain.clone()).or_insert(0);
    if *count == 0 {
        *count += 1;
        return plain;
    }
    let candidate = format!("{stem} ({count}){ext}");
    *count += 1;
    candidate
}

/// Moves every non-keeper path into `quarantine_dir`, per `plan`. Not
/// transactional: if this returns an error partway through, `plan` (written
/// by the caller before this runs) still names every move, completed or not.
pub fn apply(plan: &QuarantinePlan, quarantine_dir: &Path) -> QuarantineResult<()> {
    fs::create_dir_all(quarantine_dir)?;

    for (target_name, original) in &plan.quarantine {
        let dest = quarantine_dir.join(target_name);
        fs::rename(original, &dest).map_err(|source| QuarantineError::Move {
            path: PathBuf::from(original),
            source,
        })?;
    }

    Ok(())
}
