//! Checksums and file signatures.
//!
//! This module provides:
//! - Multiple checksum algorithms (MD5, SHA-256, BLAKE3)
//! - Chunked file-level checksum computation
//! - [`file_signature`]: hash plus size and timestamps, for verification flows
//!   outside the default size/mtime diff

use std::fmt;
use std::fs::{File, Metadata};
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::error::EngineError;
use crate::model::mtime_seconds;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// MD5 (fast, not collision resistant)
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    #[default]
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "unknown hash algorithm '{}' (expected md5, sha256 or blake3)",
                other
            )),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Incremental hasher over one of the supported algorithms.
pub trait ChecksumHasher {
    fn update(&mut self, data: &[u8]);

    fn finalize(self: Box<Self>) -> ChecksumValue;
}

struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.context.compute();
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", digest))
    }
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, digest.to_hex().to_string())
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Compute checksum for a file, reading it in 64 KiB chunks.
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, EngineError> {
    let read_error = |e: io::Error| EngineError::SourceUnreadable {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).map_err(read_error)?;
    let mut hasher = create_hasher(algorithm);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        }
    }

    Ok(hasher.finalize())
}

/// Content hash plus the metadata a verification flow compares.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSignature {
    pub hash: ChecksumValue,
    pub size: u64,
    /// Modification time, fractional epoch seconds
    pub mtime: f64,
    /// Inode change time on Unix, creation time elsewhere
    pub ctime: Option<f64>,
}

/// Compute the signature of a regular file.
pub fn file_signature(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<FileSignature, EngineError> {
    let metadata = std::fs::metadata(path).map_err(|e| EngineError::SourceUnreadable {
        path: path.to_path_buf(),
        source: e,
    })?;
    let hash = compute_file_checksum(path, algorithm)?;

    Ok(FileSignature {
        hash,
        size: metadata.len(),
        mtime: mtime_seconds(&metadata),
        ctime: change_time(&metadata),
    })
}

#[cfg(unix)]
fn change_time(metadata: &Metadata) -> Option<f64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ctime() as f64 + metadata.ctime_nsec() as f64 / 1e9)
}

#[cfg(not(unix))]
fn change_time(metadata: &Metadata) -> Option<f64> {
    metadata
        .created()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn hash_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> ChecksumValue {
        let mut hasher = create_hasher(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    #[test]
    fn test_algorithm_display_and_parse() {
        for algorithm in [
            ChecksumAlgorithm::Md5,
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Blake3,
        ] {
            assert_eq!(algorithm.to_string().parse::<ChecksumAlgorithm>(), Ok(algorithm));
        }
        assert_eq!("SHA256".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha256));
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
        assert_eq!(ChecksumAlgorithm::default(), ChecksumAlgorithm::Sha256);
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hash_bytes(ChecksumAlgorithm::Md5, b"hello").hex(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(
            hash_bytes(ChecksumAlgorithm::Sha256, b"hello").hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        let blake = hash_bytes(ChecksumAlgorithm::Blake3, b"hello");
        assert_eq!(blake.hex().len(), 64);
        assert_eq!(blake, hash_bytes(ChecksumAlgorithm::Blake3, b"hello"));
    }

    #[test]
    fn test_checksum_value_display() {
        let cs = ChecksumValue::new(ChecksumAlgorithm::Sha256, "abc123".to_string());
        assert_eq!(cs.to_string(), "abc123");
        assert_eq!(cs.to_string_with_algo(), "sha256:abc123");
    }

    #[test]
    fn test_file_checksum_spans_chunks() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("big.bin");
        let data: Vec<u8> = (0..READ_BUFFER_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let from_file = compute_file_checksum(&path, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(from_file, hash_bytes(ChecksumAlgorithm::Sha256, &data));
    }

    #[test]
    fn test_file_signature() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let signature = file_signature(&path, ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(signature.size, 5);
        assert_eq!(signature.mtime, 1_000_000.0);
        assert_eq!(signature.hash.hex(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_signature_of_missing_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = file_signature(&temp_dir.path().join("none"), ChecksumAlgorithm::Sha256);
        assert!(matches!(result, Err(EngineError::SourceUnreadable { .. })));
    }
}
