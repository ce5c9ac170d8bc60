//! Writing output documents
//!
//! Files are replaced atomically and only when their content changes, so
//! re-running a promotion over unchanged inputs leaves timestamps alone.

use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::Result;

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Write `contents` to `dest` unless it already holds exactly that.
///
/// Returns whether the file was written.
pub fn write_if_changed(dest: &Path, contents: &[u8]) -> Result<bool> {
    if let Ok(existing) = std::fs::read(dest) {
        if digest(&existing) == digest(contents) {
            tracing::debug!(path = %dest.display(), "unchanged, not rewriting");
            return Ok(false);
        }
    }

    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(contents)?;
    staged.flush()?;
    staged.persist(dest).map_err(|e| e.error)?;
    tracing::info!(path = %dest.display(), bytes = contents.len(), "wrote output");
    Ok(true)
}
