//! Streaming content digests.
//!
//! A [`DigestContext`] accumulates chunk updates and finalizes once into a
//! lowercase hex string. The drivers below feed it from a byte slice, any
//! `Read`, or a file, optionally reporting `(processed, total)` after each
//! chunk.

use crate::sftp::error::{SftpError, SftpResult};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Read size used by the digest drivers when the caller has no preference.
pub const DEFAULT_DIGEST_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Length of the hex rendering.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 32,
            DigestAlgorithm::Sha256 => 64,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }
}

enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

pub struct DigestContext {
    algorithm: DigestAlgorithm,
    hasher: Option<Hasher>,
    finalized: Option<String>,
}

impl DigestContext {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let hasher = match algorithm {
            DigestAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        };
        Self {
            algorithm,
            hasher: Some(hasher),
            finalized: None,
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    /// Feed the next chunk. Rejected once the context is finalized.
    pub fn update(&mut self, chunk: &[u8]) -> SftpResult<()> {
        match self.hasher.as_mut() {
            Some(Hasher::Md5(h)) => h.update(chunk),
            Some(Hasher::Sha256(h)) => h.update(chunk),
            None => {
                return Err(SftpError::digest(format!(
                    "{} context already finalized",
                    self.algorithm.label()
                )))
            }
        }
        Ok(())
    }

    /// Lowercase hex digest of everything fed so far. Repeat calls return
    /// the cached value.
    pub fn finalize(&mut self) -> String {
        if let Some(done) = &self.finalized {
            return done.clone();
        }
        let hex = match self.hasher.take() {
            Some(Hasher::Md5(h)) => hex::encode(h.finalize()),
            Some(Hasher::Sha256(h)) => hex::encode(h.finalize()),
            None => String::new(),
        };
        self.finalized = Some(hex.clone());
        hex
    }
}

// ── Drivers ──────────────────────────────────────────────────────────

/// Digest everything `reader` yields, `chunk_size` bytes at a time.
///
/// `total` is only passed through to `progress`; the reader is consumed to
/// EOF regardless.
pub fn digest_reader<R: Read>(
    mut reader: R,
    algorithm: DigestAlgorithm,
    total: u64,
    chunk_size: usize,
    mut progress: Option<&mut dyn FnMut(u64, u64)>,
) -> SftpResult<String> {
    let mut ctx = DigestContext::new(algorithm);
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut processed: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(SftpError::local_io(format!("digest read failed: {}", e))),
        };
        ctx.update(&buf[..n])?;
        processed += n as u64;
        if let Some(cb) = progress.as_mut() {
            cb(processed, total);
        }
    }
    Ok(ctx.finalize())
}

pub fn digest_bytes(
    data: &[u8],
    algorithm: DigestAlgorithm,
    chunk_size: usize,
    progress: Option<&mut dyn FnMut(u64, u64)>,
) -> SftpResult<String> {
    digest_reader(data, algorithm, data.len() as u64, chunk_size, progress)
}

pub fn digest_file(
    path: impl AsRef<Path>,
    algorithm: DigestAlgorithm,
    chunk_size: usize,
    progress: Option<&mut dyn FnMut(u64, u64)>,
) -> SftpResult<String> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| SftpError::local_io(format!("Cannot open '{}': {}", path.display(), e)))?;
    let total = file.metadata().map(|m| m.len()).unwrap_or(0);
    digest_reader(file, algorithm, total, chunk_size, progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5_EMPTY: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[test]
    fn md5_known_vectors() {
        let d = |s: &str| digest_bytes(s.as_bytes(), DigestAlgorithm::Md5, 4096, None).unwrap();
        assert_eq!(d(""), MD5_EMPTY);
        assert_eq!(d("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(d("hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn sha256_known_vectors() {
        let d = |s: &str| digest_bytes(s.as_bytes(), DigestAlgorithm::Sha256, 4096, None).unwrap();
        assert_eq!(
            d(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            d("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn chunk_size_does_not_change_result() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let reference = digest_bytes(&data, DigestAlgorithm::Md5, 4096, None).unwrap();
        for chunk in [1, 7, 1000, 10_000, 65_536] {
            assert_eq!(
                digest_bytes(&data, DigestAlgorithm::Md5, chunk, None).unwrap(),
                reference
            );
        }
    }

    #[test]
    fn progress_is_strictly_increasing_and_ends_at_total() {
        let data = vec![1u8; 10_000];
        let mut seen = Vec::new();
        let mut cb = |done: u64, total: u64| seen.push((done, total));
        digest_bytes(&data, DigestAlgorithm::Md5, 4096, Some(&mut cb)).unwrap();
        assert_eq!(seen, vec![(4096, 10_000), (8192, 10_000), (10_000, 10_000)]);
    }

    #[test]
    fn empty_input_reports_no_progress() {
        let mut calls = 0;
        let mut cb = |_: u64, _: u64| calls += 1;
        let d = digest_bytes(&[], DigestAlgorithm::Md5, 4096, Some(&mut cb)).unwrap();
        assert_eq!(calls, 0);
        assert_eq!(d, MD5_EMPTY);
    }

    #[test]
    fn finalize_is_idempotent_and_update_after_is_rejected() {
        let mut ctx = DigestContext::new(DigestAlgorithm::Md5);
        ctx.update(b"ab").unwrap();
        ctx.update(b"c").unwrap();
        let first = ctx.finalize();
        assert_eq!(first, "900150983cd24fb0d6963f7d28e17f72");
        assert!(ctx.is_finalized());
        assert!(ctx.update(b"more").is_err());
        assert_eq!(ctx.finalize(), first);
    }

    #[test]
    fn digest_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            digest_file(&path, DigestAlgorithm::Md5, DEFAULT_DIGEST_CHUNK, None).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert!(digest_file(dir.path().join("missing"), DigestAlgorithm::Md5, 16, None).is_err());
    }

    #[test]
    fn hex_len_matches_output() {
        for alg in [DigestAlgorithm::Md5, DigestAlgorithm::Sha256] {
            assert_eq!(digest_bytes(b"x", alg, 4, None).unwrap().len(), alg.hex_len());
        }
    }
}
