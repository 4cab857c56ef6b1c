//! Shared utility functions

use std::path::{Path, PathBuf};

use eyre::Result;

/// Expand `~` prefix to the user's home directory.
///
/// Returns the original string unchanged if it doesn't start with `~/`
/// or if the home directory cannot be determined.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{}", home.to_string_lossy(), rest);
        }
    }
    path.to_string()
}

/// Resolve a HuggingFace Hub cache directory to its snapshot path.
///
/// HuggingFace stores models in `<model_dir>/snapshots/<hash>/`. This function
/// checks for that structure and returns the snapshot path, or the original
/// path if no snapshots directory exists.
pub fn resolve_hf_snapshot(model_dir: &Path) -> Result<PathBuf> {
    let snapshots_dir = model_dir.join("snapshots");
    if snapshots_dir.exists() {
        let snapshot = std::fs::read_dir(&snapshots_dir)?
            .filter_map(|e| e.ok())
            .find(|e| e.path().is_dir())
            .ok_or_else(|| eyre::eyre!("No snapshot found in {:?}", snapshots_dir))?;
        Ok(snapshot.path())
    } else {
        Ok(model_dir.to_path_buf())
    }
}

/// Parse size string like "512x512" into (width, height)
pub fn parse_size(size: &str) -> Result<(u32, u32)> {
    let (width, height) = size
        .split_once('x')
        .ok_or_else(|| eyre::eyre!("Invalid size format: {}. Expected WIDTHxHEIGHT (e.g., 512x512)", size))?;

    let width: u32 = width.trim().parse().map_err(|_| eyre::eyre!("Invalid width: {}", width))?;
    let height: u32 = height.trim().parse().map_err(|_| eyre::eyre!("Invalid height: {}", height))?;
    Ok((width, height))
}
