//! Re-anchoring of imprint paths onto a live tree
//!
//! Imprints record the absolute paths they were generated under, together
//! with base path rows naming the roots of those walks. Checking a tree that
//! now lives somewhere else (a backup, a restored copy, another volume)
//! re-anchors each imprint path: the portion below the recorded base path is
//! resolved against the data path being checked.

use crate::error::{ImprintError, Result};
use std::path::{Path, PathBuf};

/// Re-anchor `path` from `old_base` onto `new_base`
///
/// `/old/base/sub/file` rebased from `/old/base` onto `/new/root` yields
/// `/new/root/sub/file`; the base path itself rebases to `new_base`.
///
/// # Errors
///
/// [`ImprintError::InvalidPath`] if `path` is not under `old_base`.
pub fn rebase(path: &Path, old_base: &Path, new_base: &Path) -> Result<PathBuf> {
    let relative = path.strip_prefix(old_base).map_err(|_| {
        ImprintError::invalid_path(format!(
            "path `{}` is not anchored under base path `{}`",
            path.display(),
            old_base.display()
        ))
    })?;
    if relative.as_os_str().is_empty() {
        Ok(new_base.to_path_buf())
    } else {
        Ok(new_base.join(relative))
    }
}
