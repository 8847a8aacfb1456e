#![forbid(unsafe_code)]

//! Process and input hardening for the backend.

use std::path::Path;

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when the backend is started as root. Uploads land on disk with
/// the server's identity, so it must run as an unprivileged account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; start it from a dedicated service account");
    }
    Ok(())
}

/// Reduces a client supplied filename to a bare name that is safe to join
/// onto the storage root.
///
/// Only the last component of either separator style survives, control
/// characters are dropped, and `.`/`..` or an empty result yield `None`.
pub fn sanitize_upload_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = last.chars().filter(|ch| !ch.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned.to_string())
}

/// Rewrites every occurrence of `root` in `text` to `replacement`, so error
/// text leaving the process only carries media-root relative paths.
pub fn redact_root(text: &str, root: &Path, replacement: &str) -> String {
    let root = root.to_string_lossy();
    let root = root.trim_end_matches('/');
    if root.is_empty() || root == "." {
        return text.to_string();
    }
    text.replace(root, replacement)
}
