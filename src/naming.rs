//! Collision-free file names inside the storage root.
//!
//! A taken `clip.mp4` becomes `clip_1.mp4`, then `clip_2.mp4`, and so on. The
//! outcome depends only on which candidates already exist, never on
//! timestamps or listing order, so a fixed directory snapshot always resolves
//! the same way.
//!
//! [`resolve_unique_name`] only checks for existence. Two callers resolving
//! the same name before either creates its file get the same answer, so the
//! upload pipeline holds one lock across resolution and placement.
//! [`create_unique_file`] claims a candidate with an exclusive create instead
//! and is safe without the lock.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
};

use tracing::debug;

/// Splits a file name into stem and extension on its last dot. A leading dot
/// belongs to the stem, so `.bashrc` has no extension.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Returns the `attempt`-th candidate: the name itself for 0, otherwise
/// `stem_<attempt>.ext`.
pub fn candidate_name(stem: &str, ext: Option<&str>, attempt: u64) -> String {
    match (attempt, ext) {
        (0, Some(ext)) => format!("{stem}.{ext}"),
        (0, None) => stem.to_string(),
        (n, Some(ext)) => format!("{stem}_{n}.{ext}"),
        (n, None) => format!("{stem}_{n}"),
    }
}

/// Returns the first candidate for `desired` that does not exist in `dir`.
pub fn resolve_unique_name(dir: &Path, desired: &str) -> io::Result<String> {
    let (stem, ext) = split_name(desired);
    for attempt in 0.. {
        let name = candidate_name(stem, ext, attempt);
        if !entry_exists(&dir.join(&name))? {
            if attempt > 0 {
                debug!(desired, resolved = %name, "renamed to avoid collision");
            }
            return Ok(name);
        }
    }
    unreachable!("candidate suffixes exhausted")
}

/// Walks the same candidates as [`resolve_unique_name`] but claims each one
/// with an exclusive create, returning the name together with the new empty
/// file.
pub fn create_unique_file(dir: &Path, desired: &str) -> io::Result<(String, File)> {
    let (stem, ext) = split_name(desired);
    for attempt in 0.. {
        let name = candidate_name(stem, ext, attempt);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&name))
        {
            Ok(file) => return Ok((name, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    unreachable!("candidate suffixes exhausted")
}

// Dangling symlinks count as taken since creating over them would fail.
fn entry_exists(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
