//! Turns a [`sink_traversal::MarkResult`]'s work list into index-store rows.
//!
//! Files are hashed first (optionally across a bounded worker pool — hashing
//! is the only CPU/IO-bound step, so it is the only step parallelized; the
//! `ptree-traversal` work-queue pattern is generalized here into a plain
//! rayon pool over an independent list of paths rather than a live DFS
//! queue, since by this stage the walk is already complete). Directories are
//! then folded in the marked post-order: by the time a directory is
//! reached, every child it reads from disk is guaranteed already `completed`
//! in the store.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sink_store::{IndexStore, PathRecord, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] sink_store::StoreError),

    #[error(transparent)]
    Digest(#[from] sink_digest::DigestError),

    #[error("{parent} lists child {child} which is not yet indexed")]
    MissingChild { parent: PathBuf, child: PathBuf },
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Hashes and upserts every path in `marked`, in order: all regular files
/// first, then directories in the post-order they were marked.
///
/// A single path's I/O failure (hash error, or a directory whose fold fails
/// because one of its children was skipped) is logged and that path alone
/// is skipped — it never aborts the rest of the batch. A directory's fold
/// naturally cascades: if a child was skipped, the parent's lookup misses
/// too and the parent is skipped in turn, all the way up.
///
/// `threads` bounds the worker pool used for the file-hashing step only;
/// `None` uses rayon's global pool (or runs serially without the `parallel`
/// feature). The pool is scoped to hashing alone, since `store` is not
/// `Sync` and must never be shared into worker threads.
pub fn process_marked(
    store: &IndexStore,
    report_id: i64,
    chunk_size: usize,
    marked: &[PathBuf],
    threads: Option<usize>,
) -> IndexResult<()> {
    let (files, dirs) = partition_by_kind(marked)?;

    for outcome in hash_files(&files, chunk_size, threads)? {
        match outcome {
            Ok(file) => store.upsert(&file_to_record(file, report_id))?,
            Err((path, err)) => log::warn!("skipping {}: {err}", path.display()),
        }
    }

    for dir in dirs {
        match fold_directory(store, &dir, report_id) {
            Ok(record) => store.upsert(&record)?,
            Err(err) => log::warn!("skipping {}: {err}", dir.display()),
        }
    }

    Ok(())
}

struct HashedFile {
    path: PathBuf,
    digest: String,
    size: u64,
    mtime: f64,
}

fn partition_by_kind(marked: &[PathBuf]) -> Result<(Vec<PathBuf>, Vec<PathBuf>), IndexError> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for path in marked {
        let metadata = fs::symlink_metadata(path)?;
        if metadata.is_dir() && !metadata.file_type().is_symlink() {
            dirs.push(path.clone());
        } else {
            files.push(path.clone());
        }
    }
    Ok((files, dirs))
}

/// Each file is hashed independently; a per-file failure is reported as an
/// `Err((path, error))` entry rather than aborting the whole batch, so the
/// caller can upsert every file that did succeed.
type HashOutcome = Result<HashedFile, (PathBuf, IndexError)>;

#[cfg(feature = "parallel")]
fn hash_files(
    files: &[PathBuf],
    chunk_size: usize,
    threads: Option<usize>,
) -> Result<Vec<HashOutcome>, IndexError> {
    use rayon::prelude::*;

    let hash_all = || {
        files
            .par_iter()
            .map(|path| hash_one_file(path, chunk_size).map_err(|e| (path.clone(), e)))
            .collect()
    };

    match threads {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| IndexError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            Ok(pool.install(hash_all))
        }
        None => Ok(hash_all()),
    }
}

#[cfg(not(feature = "parallel"))]
fn hash_files(
    files: &[PathBuf],
    chunk_size: usize,
    _threads: Option<usize>,
) -> Result<Vec<HashOutcome>, IndexError> {
    Ok(files.iter().map(|path| hash_one_file(path, chunk_size).map_err(|e| (path.clone(), e))).collect())
}

/// Never follows a symlink: a symlink is hashed/sized from its own link
/// target string, not the file it points to, matching the traversal's
/// `fs::symlink_metadata`-based classification of symlinks as non-dereferenced
/// leaves regardless of what they point to.
fn hash_one_file(path: &Path, chunk_size: usize) -> Result<HashedFile, IndexError> {
    let metadata = fs::symlink_metadata(path)?;
    let (digest, size) = if metadata.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        let target_bytes = target.to_string_lossy().into_owned().into_bytes();
        (sink_digest::hash_bytes(&target_bytes), target_bytes.len() as u64)
    } else {
        (sink_digest::hash_file(path, chunk_size)?, metadata.len())
    };
    Ok(HashedFile { path: path.to_path_buf(), digest, size, mtime: mtime_as_secs(&metadata) })
}

fn file_to_record(file: HashedFile, report_id: i64) -> PathRecord {
    PathRecord {
        path: file.path.to_string_lossy().to_string(),
        digest: file.digest,
        is_dir: false,
        count: 1,
        size: file.size,
        mtime: file.mtime,
        status: Status::Completed,
        report_id,
    }
}

/// Looks up every direct child of `dir` on disk in `store`, combines their
/// digests, and sums their sizes/counts into a record for `dir` itself.
fn fold_directory(store: &IndexStore, dir: &Path, report_id: i64) -> Result<PathRecord, IndexError> {
    let mut child_digests = Vec::new();
    let mut total_size: u64 = 0;
    let mut total_count: u64 = 0;

    for entry in fs::read_dir(dir)? {
        let child = entry?.path();
        let key = child.to_string_lossy();
        let record = store
            .lookup(&key, Status::Completed)?
            .ok_or_else(|| IndexError::MissingChild { parent: dir.to_path_buf(), child: child.clone() })?;

        child_digests.push(record.digest);
        total_size += record.size;
        // Directories contribute their transitive file count; they
        // themselves are not counted.
        total_count += if record.is_dir { record.count } else { 1 };
    }

    let digest = sink_digest::directory_digest(dir, child_digests.iter().map(String::as_str))?;
    let metadata = fs::metadata(dir)?;

    Ok(PathRecord {
        path: dir.to_string_lossy().to_string(),
        digest,
        is_dir: true,
        count: total_count,
        size: total_size,
        mtime: mtime_as_secs(&metadata),
        status: Status::Completed,
        report_id,
    })
}

fn mtime_as_secs(metadata: &fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
