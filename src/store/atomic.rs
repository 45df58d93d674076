//! Atomic file replacement.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Suffix of in-progress writes. Files with it are never part of the tree.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Replace `path` with `contents` so readers see either the old file or the
/// new one, never a partial write.
///
/// Writes a sibling temp file, syncs it, then renames it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = dir.join(format!(".{}.{:016x}{}", file_name, fastrand::u64(..), TEMP_SUFFIX));

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });

    if let Err(e) = written.and_then(|_| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

/// Remove `path`, treating a missing file as already removed.
///
/// Returns whether a file was actually deleted.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
