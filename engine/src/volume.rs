//! Destination volume queries.
//!
//! The orchestrator asks a [`VolumeProbe`] two things about the destination:
//! how many bytes are free, and what kind of drive it lives on. The drive
//! kind picks the copy chunk size: large chunks for solid-state media, small
//! ones for spinning disks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Storage technology backing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveKind {
    SolidState,
    Rotational,
    Unknown,
}

impl DriveKind {
    /// Suggested copy chunk size in bytes.
    pub fn chunk_size(self) -> usize {
        match self {
            DriveKind::SolidState => 1024 * 1024,
            DriveKind::Rotational => 8 * 1024,
            DriveKind::Unknown => 64 * 1024,
        }
    }
}

/// Free-space and drive-type queries for a destination path.
///
/// Implementations must accept paths that do not exist yet; they answer for
/// the volume the path would be created on.
pub trait VolumeProbe {
    fn free_space(&self, path: &Path) -> io::Result<u64>;

    fn drive_kind(&self, path: &Path) -> DriveKind;

    fn suggested_chunk_size(&self, path: &Path) -> usize {
        self.drive_kind(path).chunk_size()
    }
}

/// Probe backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVolumeProbe;

impl VolumeProbe for SystemVolumeProbe {
    fn free_space(&self, path: &Path) -> io::Result<u64> {
        let existing = nearest_existing(path)?;
        available_bytes(&existing)
    }

    fn drive_kind(&self, path: &Path) -> DriveKind {
        let kind = detect_drive_kind(path);
        debug!(path = %path.display(), ?kind, "detected drive kind");
        kind
    }
}

/// Walk up from `path` to the first ancestor that exists.
fn nearest_existing(path: &Path) -> io::Result<PathBuf> {
    let mut cursor = Some(path);
    while let Some(candidate) = cursor {
        if candidate.exists() {
            return Ok(candidate.to_path_buf());
        }
        cursor = candidate.parent();
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no existing ancestor for {}", path.display()),
    ))
}

#[cfg(unix)]
fn available_bytes(path: &Path) -> io::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
    #[allow(clippy::unnecessary_cast)]
    let free = stat.blocks_available() as u64 * stat.fragment_size() as u64;
    Ok(free)
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free space query is not supported on this platform",
    ))
}

#[cfg(target_os = "linux")]
fn detect_drive_kind(path: &Path) -> DriveKind {
    let resolved = match nearest_existing(path).and_then(|p| p.canonicalize()) {
        Ok(resolved) => resolved,
        Err(_) => return DriveKind::Unknown,
    };
    let mounts = match fs::read_to_string("/proc/self/mounts") {
        Ok(mounts) => mounts,
        Err(_) => return DriveKind::Unknown,
    };
    let device = match mount_device_for(&mounts, &resolved) {
        Some(device) => device,
        None => return DriveKind::Unknown,
    };
    kind_for_device(&device)
}

#[cfg(not(target_os = "linux"))]
fn detect_drive_kind(_path: &Path) -> DriveKind {
    DriveKind::Unknown
}

/// Device of the mount with the longest mount point containing `path`.
fn mount_device_for(mounts: &str, path: &Path) -> Option<String> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = unescape_mount_field(fields.next()?);
            Some((device, mount_point))
        })
        .filter(|(_, mount_point)| path.starts_with(mount_point))
        .max_by_key(|(_, mount_point)| mount_point.len())
        .map(|(device, _)| device.to_string())
}

/// `/proc/mounts` encodes whitespace in paths as octal escapes (`\040`).
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn kind_for_device(device: &str) -> DriveKind {
    let name = match device.strip_prefix("/dev/") {
        Some(name) => name,
        None => return DriveKind::Unknown,
    };
    let lowered = name.to_ascii_lowercase();
    if lowered.contains("nvme") || lowered.contains("ssd") {
        return DriveKind::SolidState;
    }

    let sys_entry = Path::new("/sys/class/block").join(name);
    let mut candidates = vec![sys_entry.join("queue").join("rotational")];
    // partitions have no queue of their own; their parent device does
    if let Ok(real) = sys_entry.canonicalize() {
        if let Some(parent) = real.parent() {
            candidates.push(parent.join("queue").join("rotational"));
        }
    }

    candidates
        .iter()
        .find_map(|flag| fs::read_to_string(flag).ok())
        .map(|flag| parse_rotational_flag(&flag))
        .unwrap_or(DriveKind::Unknown)
}

fn parse_rotational_flag(flag: &str) -> DriveKind {
    match flag.trim() {
        "0" => DriveKind::SolidState,
        "1" => DriveKind::Rotational,
        _ => DriveKind::Unknown,
    }
}
