//! Inventory comparison.
//!
//! [`diff`] is the fast path used by every run: it looks only at size and
//! modification time, with a 2 second tolerance to absorb timestamp
//! resolution differences between filesystems (FAT, SMB shares, ...).
//!
//! [`files_identical`] is the strong comparator for verification. It also
//! compares permission bits and the file content, chunk by chunk, and is
//! never called by the fast path.

use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;

use crate::model::{mtime_seconds, DiffResult, FileRecord, Inventory};

/// Largest mtime difference, in seconds, still treated as equal.
pub const MTIME_TOLERANCE_SECS: f64 = 2.0;

/// Chunk size used by the strong comparator when none is given.
pub const COMPARE_CHUNK_SIZE: usize = 64 * 1024;

/// Whether `dest` must be rewritten to match `source`.
pub fn needs_update(source: &FileRecord, dest: &FileRecord) -> bool {
    source.size != dest.size || (source.mtime - dest.mtime).abs() > MTIME_TOLERANCE_SECS
}

/// Classify every path of both inventories.
pub fn diff(source: &Inventory, dest: &Inventory) -> DiffResult {
    let mut result = DiffResult::default();

    for (relpath, src) in source {
        match dest.get(relpath) {
            None => {
                result.to_copy.insert(relpath.clone());
            }
            Some(dst) if needs_update(src, dst) => {
                debug!(%relpath, src_size = src.size, dst_size = dst.size, "needs update");
                result.to_update.insert(relpath.clone());
            }
            Some(_) => {
                result.unchanged.insert(relpath.clone());
            }
        }
    }

    for relpath in dest.keys() {
        if !source.contains_key(relpath) {
            result.to_delete.insert(relpath.clone());
        }
    }

    debug!(
        to_copy = result.to_copy.len(),
        to_update = result.to_update.len(),
        to_delete = result.to_delete.len(),
        unchanged = result.unchanged.len(),
        "diff computed"
    );
    result
}

/// Strong equality check between two files.
///
/// Returns `Ok(false)` as soon as size, mtime (within tolerance), permission
/// bits or any content chunk differs. A missing file on either side also
/// yields `Ok(false)`; other I/O failures are returned as errors.
pub fn files_identical(source: &Path, dest: &Path, chunk_size: usize) -> io::Result<bool> {
    let (src_meta, dst_meta) = match (fs::metadata(source), fs::metadata(dest)) {
        (Ok(s), Ok(d)) => (s, d),
        (Err(e), _) | (_, Err(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        (Err(e), _) | (_, Err(e)) => return Err(e),
    };

    if !src_meta.is_file() || !dst_meta.is_file() || src_meta.len() != dst_meta.len() {
        return Ok(false);
    }
    if (mtime_seconds(&src_meta) - mtime_seconds(&dst_meta)).abs() > MTIME_TOLERANCE_SECS {
        return Ok(false);
    }
    if permission_bits(&src_meta) != permission_bits(&dst_meta) {
        return Ok(false);
    }

    let chunk_size = chunk_size.max(1);
    let mut src_file = File::open(source)?;
    let mut dst_file = File::open(dest)?;
    let mut src_buf = vec![0u8; chunk_size];
    let mut dst_buf = vec![0u8; chunk_size];

    loop {
        let read_src = read_chunk(&mut src_file, &mut src_buf)?;
        let read_dst = read_chunk(&mut dst_file, &mut dst_buf)?;
        if read_src != read_dst || src_buf[..read_src] != dst_buf[..read_dst] {
            return Ok(false);
        }
        if read_src == 0 {
            return Ok(true);
        }
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    u32::from(metadata.permissions().readonly())
}

/// Fill `buf` as far as the reader allows; returns the number of bytes read.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
