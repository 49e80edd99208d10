//! Single-file transfer and removal.
//!
//! This module provides the low-level operations used while executing a run:
//! - Chunked file copy with timestamp and permission preservation
//! - Idempotent removal of files and whole directory trees
//! - Parent directory creation and empty-parent pruning
//!
//! Copies write straight into the destination path. A failure part-way
//! through leaves the bytes already written in place; the next run sees a
//! size or mtime mismatch and rewrites the file.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use filetime::FileTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EngineError;

/// Chunk size used when the destination volume type is unknown.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Streams files in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct Copier {
    chunk_size: usize,
}

impl Default for Copier {
    fn default() -> Self {
        Copier::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Copier {
    /// Create a copier reading and writing `chunk_size` bytes at a time.
    pub fn new(chunk_size: usize) -> Self {
        Copier {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copy `src` to `dst`, preserving access/modification times and
    /// permissions.
    ///
    /// `on_bytes` receives the cumulative number of bytes written after every
    /// chunk.
    ///
    /// # Returns
    /// Number of bytes copied
    ///
    /// # Errors
    /// - `SourceUnreadable` if the source cannot be opened or stat'ed
    /// - `DirectoryCreationFailed` if the parent directory cannot be created
    /// - `NotWritable` if the destination exists and is read-only
    /// - `DestinationUnwritable` if the destination cannot be created or its
    ///   timestamps cannot be set
    /// - `TransferInterrupted` on an I/O fault while streaming
    pub fn copy(
        &self,
        src: &Path,
        dst: &Path,
        on_bytes: &mut dyn FnMut(u64),
    ) -> Result<u64, EngineError> {
        let mut src_file = File::open(src).map_err(|e| EngineError::SourceUnreadable {
            path: src.to_path_buf(),
            source: e,
        })?;
        let src_metadata = src_file
            .metadata()
            .map_err(|e| EngineError::SourceUnreadable {
                path: src.to_path_buf(),
                source: e,
            })?;

        ensure_parent_dir_exists(dst)?;

        if let Ok(existing) = fs::metadata(dst) {
            if existing.permissions().readonly() {
                return Err(EngineError::NotWritable {
                    path: dst.to_path_buf(),
                });
            }
        }

        let mut dst_file = File::create(dst).map_err(|e| EngineError::DestinationUnwritable {
            path: dst.to_path_buf(),
            source: e,
        })?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut copied: u64 = 0;
        loop {
            let read = match src_file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(EngineError::TransferInterrupted {
                        path: src.to_path_buf(),
                        source: e,
                    })
                }
            };
            dst_file
                .write_all(&buffer[..read])
                .map_err(|e| EngineError::TransferInterrupted {
                    path: dst.to_path_buf(),
                    source: e,
                })?;
            copied += read as u64;
            on_bytes(copied);
        }
        dst_file.flush().map_err(|e| EngineError::TransferInterrupted {
            path: dst.to_path_buf(),
            source: e,
        })?;
        drop(dst_file);

        let atime = FileTime::from_last_access_time(&src_metadata);
        let mtime = FileTime::from_last_modification_time(&src_metadata);
        filetime::set_file_times(dst, atime, mtime).map_err(|e| {
            EngineError::DestinationUnwritable {
                path: dst.to_path_buf(),
                source: e,
            }
        })?;

        if let Err(e) = fs::set_permissions(dst, src_metadata.permissions()) {
            warn!(path = %dst.display(), error = %e, "could not copy permissions");
        }

        debug!(src = %src.display(), dst = %dst.display(), bytes = copied, "copied");
        Ok(copied)
    }

    /// Remove `path`, whether it is a file, a symlink or a directory tree.
    ///
    /// A path that does not exist counts as removed. Directories are checked
    /// for read-only entries before anything is removed, then emptied
    /// bottom-up and removed themselves.
    pub fn delete(&self, path: &Path) -> Result<(), EngineError> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "already absent");
                return Ok(());
            }
            Err(e) => {
                return Err(EngineError::DeleteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        if !metadata.is_dir() {
            if metadata.file_type().is_file() && metadata.permissions().readonly() {
                return Err(EngineError::NotWritable {
                    path: path.to_path_buf(),
                });
            }
            return remove_entry(path, false);
        }

        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| walk_error(path, e))?;
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                continue;
            }
            let readonly = entry
                .metadata()
                .map_err(|e| walk_error(entry.path(), e))?
                .permissions()
                .readonly();
            if readonly {
                return Err(EngineError::NotWritable {
                    path: entry.path().to_path_buf(),
                });
            }
        }

        for entry in WalkDir::new(path).follow_links(false).contents_first(true) {
            let entry = entry.map_err(|e| walk_error(path, e))?;
            remove_entry(entry.path(), entry.file_type().is_dir())?;
        }
        Ok(())
    }
}

fn remove_entry(path: &Path, is_dir: bool) -> Result<(), EngineError> {
    let result = if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::DeleteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn walk_error(path: &Path, err: walkdir::Error) -> EngineError {
    let path = err.path().unwrap_or(path).to_path_buf();
    EngineError::DeleteFailed {
        path,
        source: err.into(),
    }
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns `DirectoryCreationFailed` if the parent exists but is not a
/// directory, or if it cannot be created.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// Remove directories left empty above `path`, stopping at `root`.
///
/// Returns the number of directories removed. `root` itself is never removed.
pub fn prune_empty_parents(path: &Path, root: &Path) -> usize {
    let mut removed = 0;
    let mut cursor = path.parent();
    while let Some(dir) = cursor {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // remove_dir fails on a non-empty directory, which ends the climb
        if fs::remove_dir(dir).is_err() {
            break;
        }
        debug!(path = %dir.display(), "removed empty directory");
        removed += 1;
        cursor = dir.parent();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_preserves_content_and_mtime() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("nested").join("dir").join("dest.txt");
        fs::write(&src, b"test content").expect("Failed to write source");
        let mtime = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&src, mtime).expect("Failed to set mtime");

        let copied = Copier::new(5)
            .copy(&src, &dst, &mut |_| {})
            .expect("Failed to copy");
        assert_eq!(copied, 12);

        let content = fs::read_to_string(&dst).expect("Failed to read dest");
        assert_eq!(content, "test content");
        let dst_meta = fs::metadata(&dst).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&dst_meta), mtime);
        assert_eq!(dst_meta.len(), 12);
    }

    #[test]
    fn test_copy_reports_cumulative_bytes_per_chunk() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.bin");
        let dst = temp_dir.path().join("dest.bin");
        fs::write(&src, vec![7u8; 10]).unwrap();

        let mut seen = Vec::new();
        Copier::new(4)
            .copy(&src, &dst, &mut |n| seen.push(n))
            .expect("Failed to copy");
        assert_eq!(seen, vec![4, 8, 10]);
    }

    #[test]
    fn test_copy_overwrites_existing_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("b.txt");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"much older content").unwrap();

        Copier::default().copy(&src, &dst, &mut |_| {}).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
    }

    #[test]
    fn test_copy_missing_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = Copier::default().copy(
            &temp_dir.path().join("missing.txt"),
            &temp_dir.path().join("out.txt"),
            &mut |_| {},
        );
        assert!(matches!(result, Err(EngineError::SourceUnreadable { .. })));
        assert!(!temp_dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_copy_refuses_readonly_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("b.txt");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();
        let mut perms = fs::metadata(&dst).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&dst, perms).unwrap();

        let result = Copier::default().copy(&src, &dst, &mut |_| {});
        assert!(matches!(result, Err(EngineError::NotWritable { .. })));
        assert_eq!(fs::read(&dst).unwrap(), b"old");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("stale.txt");
        fs::write(&file, b"x").unwrap();

        let copier = Copier::default();
        copier.delete(&file).expect("First delete should succeed");
        assert!(!file.exists());
        copier.delete(&file).expect("Deleting a missing path is a success");
    }

    #[test]
    fn test_delete_directory_tree() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("old");
        fs::create_dir_all(dir.join("a").join("b")).unwrap();
        fs::write(dir.join("top.txt"), b"1").unwrap();
        fs::write(dir.join("a").join("b").join("deep.txt"), b"2").unwrap();

        Copier::default().delete(&dir).expect("Failed to delete tree");
        assert!(!dir.exists());
        assert!(temp_dir.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_tree_with_readonly_file_removes_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("old");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("free.txt"), b"1").unwrap();
        let locked = dir.join("locked.txt");
        fs::write(&locked, b"2").unwrap();
        let mut perms = fs::metadata(&locked).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&locked, perms).unwrap();

        let result = Copier::default().delete(&dir);
        assert!(matches!(result, Err(EngineError::NotWritable { .. })));
        assert!(dir.join("free.txt").exists(), "Check happens before any removal");
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_ensure_parent_dir_rejects_file_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();

        let result = ensure_parent_dir_exists(&blocker.join("file.txt"));
        assert!(matches!(
            result,
            Err(EngineError::DirectoryCreationFailed { .. })
        ));
    }

    #[test]
    fn test_prune_empty_parents_stops_at_root_and_non_empty() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a").join("b").join("c")).unwrap();
        fs::write(root.join("a").join("keep.txt"), b"k").unwrap();

        let removed = prune_empty_parents(&root.join("a").join("b").join("c").join("gone.txt"), root);
        assert_eq!(removed, 2);
        assert!(!root.join("a").join("b").exists());
        assert!(root.join("a").exists());
    }
}
