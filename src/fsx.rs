use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

/// Scratch directories are private to the invoking user.
pub const DIR_MODE: u32 = 0o700;
/// Mirrored files and state snapshots are not group/world readable.
pub const FILE_MODE: u32 = 0o600;

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Create a directory (and parents) with mode 0700.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create dir {}", path.display()))?;
    set_mode(path, DIR_MODE).with_context(|| format!("chmod {}", path.display()))?;
    Ok(())
}

/// Nanosecond timestamp used to make temp file names unique per write.
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Modification time of a file as unix nanoseconds.
pub fn mod_unix_nanos(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Write `bytes` to `path` atomically: temp file alongside the destination
/// (mode 0600), then rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .context("destination path has no parent directory")?;
    ensure_dir(dir)?;
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = dir.join(format!("{}.tmp-{}", base, unix_nanos()));
    fs::write(&tmp, bytes).with_context(|| format!("write temp {}", tmp.display()))?;
    if let Err(err) = set_mode(&tmp, FILE_MODE) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("chmod temp {}", tmp.display()));
    }
    fs::rename(&tmp, path).map_err(|err| {
        let _ = fs::remove_file(&tmp);
        anyhow::anyhow!("rename {} -> {}: {}", tmp.display(), path.display(), err)
    })
}

/// Copy `src` to `dst` atomically with mode 0600, creating parent dirs.
pub fn copy_file_atomic(src: &Path, dst: &Path) -> Result<()> {
    let bytes = fs::read(src).with_context(|| format!("read {}", src.display()))?;
    write_atomic(dst, &bytes)
}
