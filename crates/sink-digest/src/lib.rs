//! Content-fingerprint primitives: byte/file hashing and the order-independent
//! directory combinator.
//!
//! The combinator is XOR over equal-length hex digests rather than a hash of
//! sorted concatenation: it is commutative and associative by construction
//! (no sort step is needed to make child enumeration order irrelevant), and a
//! directory's digest can be updated incrementally by XORing a child's digest
//! in or out. The weakened pre-image resistance this implies is acceptable
//! because clusters are never promoted to `accept` on a bare digest match —
//! size, basename, and mtime agreement are always checked too.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hex length of every digest produced by this crate (sha256 -> 32 bytes -> 64 hex chars).
pub const DIGEST_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("digest length mismatch: {0} vs {1}")]
    LengthMismatch(usize, usize),

    #[error("invalid hex digest: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Digest of an in-memory byte buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Streaming digest of a file, read in `chunk_size`-byte chunks. Retries
/// partial reads until EOF; any other I/O failure is surfaced to the caller.
pub fn hash_file(path: &Path, chunk_size: usize) -> Result<String, DigestError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        let n = read_full(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Reads until the buffer is full or EOF, retrying short reads.
fn read_full(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// XORs two equal-length hex digests, zero-padded back to the input length.
pub fn xor_hex(a: &str, b: &str) -> Result<String, DigestError> {
    if a.len() != b.len() {
        return Err(DigestError::LengthMismatch(a.len(), b.len()));
    }
    let a_bytes = hex::decode(a)?;
    let b_bytes = hex::decode(b)?;
    let xored: Vec<u8> = a_bytes.iter().zip(b_bytes.iter()).map(|(x, y)| x ^ y).collect();
    Ok(hex::encode(xored))
}

/// The directory combinator: order-independent fold of child digests via XOR.
/// Returns `None` for an empty child set — callers should fall back to
/// [`hash_bytes`] of the directory's own path string in that case.
pub fn combine<'a, I>(digests: I) -> Result<Option<String>, DigestError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut acc: Option<String> = None;
    for d in digests {
        acc = Some(match acc {
            None => d.to_string(),
            Some(prev) => xor_hex(&prev, d)?,
        });
    }
    Ok(acc)
}

/// Computes a directory's digest from its children, falling back to the
/// hash of its own path when it has none (spec's empty-directory case).
pub fn directory_digest<'a, I>(path: &Path, child_digests: I) -> Result<String, DigestError>
where
    I: IntoIterator<Item = &'a str>,
{
    match combine(child_digests)? {
        Some(d) => Ok(d),
        None => Ok(hash_bytes(path.to_string_lossy().as_bytes())),
    }
}

/// Parses a hex digest into its big-endian integer value.
pub fn hex_to_int(code: &str) -> Result<Vec<u8>, DigestError> {
    Ok(hex::decode(code)?)
}

/// Formats bytes back into a lowercase hex digest.
pub fn int_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
