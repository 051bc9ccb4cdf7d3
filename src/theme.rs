//! Theme resolution and asset copying.
//!
//! A theme lives at `<themes>/<name>/` and may carry its own `layouts/`
//! tree (merged over the site's layouts by [`crate::templates`]) and a
//! `static/` tree, copied to `<output>/theme/` so theme assets never
//! collide with the site's own static files.

use crate::{config::SiteConfig, error::BuildError, log};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Output subdirectory for theme assets.
pub const THEME_ASSET_DIR: &str = "theme";

/// The active theme's layout directory, when one applies.
///
/// Returns `None` when no theme is configured or the theme carries no
/// layouts of its own.
pub fn theme_layout_dir(config: &SiteConfig) -> Option<PathBuf> {
    if config.build.theme.is_empty() {
        return None;
    }
    let dir = config.theme_dir().join("layouts");
    dir.is_dir().then_some(dir)
}

/// Copy the active theme's `static/` tree into `<output>/theme/`.
///
/// A theme without static assets is fine; nothing is copied.
pub fn copy_theme_assets(config: &SiteConfig) -> Result<usize, BuildError> {
    if config.build.theme.is_empty() {
        return Ok(0);
    }
    let src = config.theme_dir().join("static");
    if !src.is_dir() {
        return Ok(0);
    }
    let dest = config.build.output.join(THEME_ASSET_DIR);
    let copied = copy_dir(&src, &dest)?;
    if copied > 0 {
        log!("build"; "copied {copied} theme asset(s)");
    }
    Ok(copied)
}

/// Recursively copy every file under `src` to the same relative path
/// under `dest`, creating directories as needed. Returns the file count.
pub fn copy_dir(src: &Path, dest: &Path) -> Result<usize, BuildError> {
    let mut copied = 0;
    for entry in WalkDir::new(src).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BuildError::Internal {
                message: format!("{}: {e}", entry.path().display()),
            })?;
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        std::fs::copy(entry.path(), &target).map_err(|e| BuildError::io(entry.path(), e))?;
        copied += 1;
    }
    Ok(copied)
}
