//! Validation of the source and destination roots.
//!
//! Checks run in a fixed order and stop at the first violation:
//! 1. source exists and is a directory
//! 2. destination, if it exists, is a directory
//! 3. resolved roots are not identical
//! 4. destination is not nested inside source
//! 5. source is not nested inside destination
//!
//! Nothing is created or modified here.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EngineError;

/// Source and destination roots after validation, both absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPaths {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Validate a source/destination pair.
///
/// The nesting check compares resolved paths component by component, so
/// `/data2` is not considered to be inside `/data`, and a destination reached
/// through a symlink into the source is still rejected.
pub fn validate(source: &Path, destination: &Path) -> Result<ValidatedPaths, EngineError> {
    match std::fs::metadata(source) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::SourceNotDirectory {
                path: source.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: source.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(EngineError::PathResolution {
                path: source.to_path_buf(),
                source: e,
            })
        }
    }

    match std::fs::metadata(destination) {
        Ok(metadata) if !metadata.is_dir() => {
            return Err(EngineError::DestinationNotDirectory {
                path: destination.to_path_buf(),
            })
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(EngineError::PathResolution {
                path: destination.to_path_buf(),
                source: e,
            })
        }
    }

    let source_abs = resolve(source)?;
    let destination_abs = resolve(destination)?;
    debug!(source = %source_abs.display(), destination = %destination_abs.display(), "resolved roots");

    if source_abs == destination_abs {
        return Err(EngineError::SamePath { path: source_abs });
    }

    if destination_abs.starts_with(&source_abs) {
        return Err(EngineError::DestinationInsideSource {
            destination: destination_abs,
        });
    }

    // A source under the destination would show up in the destination scan
    // and be deleted as stale.
    if source_abs.starts_with(&destination_abs) {
        return Err(EngineError::SourceInsideDestination {
            source_path: source_abs,
        });
    }

    Ok(ValidatedPaths {
        source: source_abs,
        destination: destination_abs,
    })
}

/// Resolve `path` to an absolute path, following symlinks where it exists.
///
/// A path that does not exist yet is resolved through its nearest existing
/// ancestor, with the missing tail appended verbatim.
pub fn resolve(path: &Path) -> Result<PathBuf, EngineError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| EngineError::PathResolution {
                path: path.to_path_buf(),
                source: e,
            })?
            .join(path)
    };

    let mut missing = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        match cursor.canonicalize() {
            Ok(existing) => {
                let mut resolved = existing;
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (cursor.parent(), cursor.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        cursor = parent;
                    }
                    _ => return Ok(absolute),
                }
            }
            Err(e) => {
                return Err(EngineError::PathResolution {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;

    #[test]
    fn test_valid_pair_with_missing_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");
        let dst = temp_dir.path().join("backup").join("mirror");

        let paths = validate(&src, &dst).expect("Pair should validate");
        assert!(paths.source.is_absolute());
        assert!(paths.destination.ends_with("backup/mirror"));
        assert!(!dst.exists(), "Validation must not create the destination");
    }

    #[test]
    fn test_missing_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = validate(&temp_dir.path().join("nope"), &temp_dir.path().join("dst"));
        assert!(matches!(result, Err(EngineError::SourceNotFound { .. })));
    }

    #[test]
    fn test_file_as_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("file.txt");
        fs::write(&src, b"x").expect("Failed to write file");

        let result = validate(&src, &temp_dir.path().join("dst"));
        assert!(matches!(result, Err(EngineError::SourceNotDirectory { .. })));
    }

    #[test]
    fn test_file_as_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");
        let dst = temp_dir.path().join("dst.txt");
        fs::write(&dst, b"x").expect("Failed to write file");

        let result = validate(&src, &dst);
        assert!(matches!(result, Err(EngineError::DestinationNotDirectory { .. })));
    }

    #[test]
    fn test_identical_paths() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");

        let result = validate(&src, &src.join("."));
        let err = result.expect_err("Identical roots must be rejected");
        assert!(matches!(err, EngineError::SamePath { .. }));
        assert_eq!(err.kind(), ErrorKind::Path);
    }

    #[test]
    fn test_nested_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("data");
        fs::create_dir(&src).expect("Failed to create src dir");

        let result = validate(&src, &src.join("backup"));
        assert!(matches!(result, Err(EngineError::DestinationInsideSource { .. })));
    }

    #[test]
    fn test_source_nested_in_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("backup");
        let src = dst.join("data");
        fs::create_dir_all(&src).expect("Failed to create src dir");

        let err = validate(&src, &dst).expect_err("Source inside destination must be rejected");
        assert!(matches!(err, EngineError::SourceInsideDestination { .. }));
        assert_eq!(err.kind(), ErrorKind::Path);
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_allowed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("data");
        fs::create_dir(&src).expect("Failed to create src dir");

        let result = validate(&src, &temp_dir.path().join("data2"));
        assert!(result.is_ok(), "Sibling '/data2' is not inside '/data'");
    }
}
