//! Turns the flat set of indexed digests into duplicate groups worth acting
//! on: cluster by digest, classify each cluster by whether its secondary
//! metadata (size, basename, mtime) agrees, then collapse nested duplicates
//! down to the topmost path that covers them (the "leaf cover" — if a whole
//! directory is duplicated, its duplicate files inside are not also
//! reported separately).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sink_store::{IndexStore, PathRecord, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error(transparent)]
    Store(#[from] sink_store::StoreError),
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// How confidently a cluster's members can be treated as true duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Digest, size, and basename all agree across every member.
    Accept,
    /// Digest and size agree but basenames differ — still almost certainly
    /// the same content under a different name, but worth a second look.
    Maybe,
    /// Digest matches but size does not. Should not occur outside a hash
    /// collision; kept as a classification rather than a hard error so a
    /// pathological cluster doesn't abort the whole resolve.
    Reject,
}

/// A group of paths sharing one content digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub digest: String,
    pub records: Vec<PathRecord>,
    pub classification: Classification,
}

impl Cluster {
    pub fn size_per_member(&self) -> u64 {
        self.records.first().map(|r| r.size).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveReport {
    pub groups: Vec<Cluster>,
    /// Total bytes occupied by every member of every reported group.
    pub original_size: u64,
    /// Bytes that would remain if exactly one member per group survived.
    pub new_size: u64,
}

/// Builds the duplicate report for everything indexed under `root`.
///
/// Classification happens before the leaf cover is built: each candidate
/// digest cluster is classified against the *full* set of paths sharing that
/// digest, and a `Reject` cluster (digest collision on unequal-size content)
/// is excluded from the leaf-cover terminal set entirely, so it never
/// suppresses real duplication nested beneath it, and never reaches the
/// final report.
pub fn resolve(store: &IndexStore, root: &Path) -> ResolverResult<ResolveReport> {
    let root_key = root.to_string_lossy().to_string();
    let all_records = store.iter_all(Some(&root_key), Status::Completed)?;

    let mut by_path: HashMap<String, PathRecord> = HashMap::new();
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for record in all_records {
        if let Some(parent) = Path::new(&record.path).parent() {
            children.entry(parent.to_string_lossy().to_string()).or_default().push(record.path.clone());
        }
        by_path.insert(record.path.clone(), record);
    }

    let dup_records = store.iter_duplicates(Some(&root_key))?;
    let mut by_digest: HashMap<String, Vec<PathRecord>> = HashMap::new();
    for record in dup_records {
        by_digest.entry(record.digest.clone()).or_default().push(record);
    }

    let classifications: HashMap<String, Classification> =
        by_digest.iter().map(|(digest, records)| (digest.clone(), classify(records))).collect();

    let terminal_digests: HashSet<String> = classifications
        .iter()
        .filter(|(_, c)| **c != Classification::Reject)
        .map(|(digest, _)| digest.clone())
        .collect();

    let covered_paths = leaf_cover(&root_key, &by_path, &children, &terminal_digests);

    let mut grouped: HashMap<String, Vec<PathRecord>> = HashMap::new();
    for path in covered_paths {
        if let Some(record) = by_path.get(&path) {
            grouped.entry(record.digest.clone()).or_default().push(record.clone());
        }
    }

    let mut original_size = 0u64;
    let mut new_size = 0u64;
    let mut groups = Vec::new();
    for (digest, mut records) in grouped {
        if records.len() < 2 {
            continue;
        }
        // Every path here was only covered because its digest is in
        // `terminal_digests`, so this lookup always hits an Accept/Maybe.
        let classification = match classifications.get(&digest) {
            Some(c) if *c != Classification::Reject => *c,
            _ => continue,
        };
        records.sort_by(|a, b| a.path.cmp(&b.path));
        let per_member = records[0].size;
        original_size += per_member * records.len() as u64;
        new_size += per_member;
        groups.push(Cluster { digest, records, classification });
    }
    groups.sort_by(|a, b| b.size_per_member().cmp(&a.size_per_member()));

    Ok(ResolveReport { groups, original_size, new_size })
}

/// Explicit-stack DFS from `root`: a path whose digest is globally
/// duplicated is added to the cover and not descended into, since any
/// duplication beneath it is already accounted for by the parent match.
fn leaf_cover(
    root: &str,
    by_path: &HashMap<String, PathRecord>,
    children: &HashMap<String, Vec<String>>,
    dup_digests: &HashSet<String>,
) -> Vec<String> {
    let mut covered = Vec::new();
    let mut stack = vec![root.to_string()];

    while let Some(path) = stack.pop() {
        let Some(record) = by_path.get(&path) else { continue };

        if dup_digests.contains(&record.digest) {
            covered.push(path);
            continue;
        }

        if record.is_dir {
            if let Some(kids) = children.get(&path) {
                stack.extend(kids.iter().cloned());
            }
        }
    }

    covered
}

/// `Accept` requires digest (already guaranteed by clustering), size,
/// basename, and mtime to all agree; any size mismatch is a `Reject`
/// (almost certainly a hash collision), and any basename or mtime mismatch
/// alone downgrades to `Maybe`.
fn classify(records: &[PathRecord]) -> Classification {
    let sizes: HashSet<u64> = records.iter().map(|r| r.size).collect();
    if sizes.len() > 1 {
        return Classification::Reject;
    }
    let basenames: HashSet<&str> = records
        .iter()
        .map(|r| Path::new(&r.path).file_name().and_then(|n| n.to_str()).unwrap_or(""))
        .collect();
    let mtimes: HashSet<u64> = records.iter().map(|r| r.mtime.to_bits()).collect();
    if basenames.len() == 1 && mtimes.len() == 1 {
        Classification::Accept
    } else {
        Classification::Maybe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_store() -> (IndexStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("sink.db")).unwrap();
        (store, dir)
    }

    fn record(path: &str, digest: &str, is_dir: bool, size: u64, report: i64) -> PathRecord {
        record_with_mtime(path, digest, is_dir, size, 0.0, report)
    }

    fn record_with_mtime(path: &str, digest: &str, is_dir: bool, size: u64, mtime: f64, report: i64) -> PathRecord {
        PathRecord {
            path: path.to_string(),
            digest: digest.to_string(),
            is_dir,
            count: if is_dir { 1 } else { 1 },
            size,
            mtime,
            status: Status::Completed,
            report_id: report,
        }
    }

    #[test]
    fn reports_a_simple_duplicate_pair() {
        let (store, dir) = temp_store();
        let root = dir.path().to_string_lossy().to_string();
        let report = store.new_report(None).unwrap();

        store.upsert(&record(&root, "root-digest", true, 20, report)).unwrap();
        store.upsert(&record(&format!("{root}/a.txt"), "dup", false, 10, report)).unwrap();
        store.upsert(&record(&format!("{root}/b.txt"), "dup", false, 10, report)).unwrap();

        let report = resolve(&store, dir.path()).unwrap();
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].records.len(), 2);
        assert_eq!(report.groups[0].classification, Classification::Accept);
        assert_eq!(report.original_size, 20);
        assert_eq!(report.new_size, 10);
    }

    #[test]
    fn whole_directory_duplicate_suppresses_nested_file_duplicates() {
        let (store, dir) = temp_store();
        let root = dir.path().to_string_lossy().to_string();
        let report = store.new_report(None).unwrap();

        // Two sibling directories with identical contents: the directory
        // pair is the duplicate; the files beneath them must not also be
        // reported as a second, redundant group.
        store.upsert(&record(&root, "root", true, 20, report)).unwrap();
        store.upsert(&record(&format!("{root}/one"), "same-dir", true, 10, report)).unwrap();
        store.upsert(&record(&format!("{root}/two"), "same-dir", true, 10, report)).unwrap();
        store.upsert(&record(&format!("{root}/one/f.txt"), "same-file", false, 10, report)).unwrap();
        store.upsert(&record(&format!("{root}/two/f.txt"), "same-file", false, 10, report)).unwrap();

        let resolved = resolve(&store, dir.path()).unwrap();
        assert_eq!(resolved.groups.len(), 1);
        assert_eq!(resolved.groups[0].digest, "same-dir");
    }

    #[test]
    fn classify_marks_differing_basenames_as_maybe() {
        let (store, dir) = temp_store();
        let root = dir.path().to_string_lossy().to_string();
        let report = store.new_report(None).unwrap();

        store.upsert(&record(&root, "root", true, 10, report)).unwrap();
        store.upsert(&record(&format!("{root}/alpha.bin"), "dup", false, 5, report)).unwrap();
        store.upsert(&record(&format!("{root}/beta.bin"), "dup", false, 5, report)).unwrap();

        let resolved = resolve(&store, dir.path()).unwrap();
        assert_eq!(resolved.groups[0].classification, Classification::Maybe);
    }

    #[test]
    fn classify_marks_differing_mtimes_as_maybe() {
        let (store, dir) = temp_store();
        let root = dir.path().to_string_lossy().to_string();
        let report = store.new_report(None).unwrap();

        store.upsert(&record(&root, "root", true, 10, report)).unwrap();
        store.upsert(&record_with_mtime(&format!("{root}/same.bin"), "dup", false, 5, 100.0, report)).unwrap();
        store.upsert(&record_with_mtime(&format!("{root}/same.bin.bak"), "dup", false, 5, 200.0, report)).unwrap();

        let resolved = resolve(&store, dir.path()).unwrap();
        assert_eq!(resolved.groups[0].classification, Classification::Maybe);
    }

    #[test]
    fn reject_cluster_is_dropped_and_does_not_hide_nested_duplicates() {
        let (store, dir) = temp_store();
        let root = dir.path().to_string_lossy().to_string();
        let report = store.new_report(None).unwrap();

        // "collision" is a hash collision between two differently-sized
        // directories; "real-dup" is a genuine duplicate pair nested inside
        // one of them. The collision must not swallow the nested pair.
        store.upsert(&record(&root, "root", true, 30, report)).unwrap();
        store.upsert(&record(&format!("{root}/one"), "collision", true, 20, report)).unwrap();
        store.upsert(&record(&format!("{root}/two"), "collision", true, 10, report)).unwrap();
        store.upsert(&record(&format!("{root}/one/a.txt"), "real-dup", false, 10, report)).unwrap();
        store.upsert(&record(&format!("{root}/one/b.txt"), "real-dup", false, 10, report)).unwrap();

        let resolved = resolve(&store, dir.path()).unwrap();
        assert!(resolved.groups.iter().all(|g| g.digest != "collision"));
        assert_eq!(resolved.groups.len(), 1);
        assert_eq!(resolved.groups[0].digest, "real-dup");
    }

    #[test]
    fn unique_digests_produce_no_groups() {
        let (store, dir) = temp_store();
        let root = dir.path().to_string_lossy().to_string();
        let report = store.new_report(None).unwrap();
        store.upsert(&record(&root, "root", true, 10, report)).unwrap();
        store.upsert(&record(&format!("{root}/a.txt"), "unique-a", false, 5, report)).unwrap();
        store.upsert(&record(&format!("{root}/b.txt"), "unique-b", false, 5, report)).unwrap();

        let resolved = resolve(&store, dir.path()).unwrap();
        assert!(resolved.groups.is_empty());
        let _ = fs::metadata(dir.path());
    }
}
