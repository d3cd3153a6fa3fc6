use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::hash::blake3_bytes;

/// Temp file used by [`atomic_write`]; a sibling of `path` so the rename stays on one filesystem.
fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!(
        ".{}.cascade-tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("output"),
        std::process::id()
    ))
}

/// Atomically replace `path` with `bytes`, creating parent directories as needed.
///
/// Readers observe either the previous contents or the new contents, never a
/// truncated file.
///
/// # Errors
/// Returns an error if the directory cannot be created or the write/rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_sibling(path);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Windows refuses to rename over an existing file.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Write `bytes` to `path` unless the file already holds exactly those bytes.
///
/// Returns `true` when the file was (re)written.
///
/// # Errors
/// Returns an error if the write fails. A missing or unreadable existing file
/// simply counts as "changed".
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing.len() == bytes.len() && blake3_bytes(&existing) == blake3_bytes(bytes) {
            return Ok(false);
        }
    }
    atomic_write(path, bytes)?;
    Ok(true)
}
