//! Builds batch items from local paths.
//!
//! A file becomes one item named after the file. A directory is walked
//! recursively and each file inside it becomes an item named by its path
//! below the directory's parent, normalized to forward slashes, so the
//! directory itself is recreated at the destination.

use std::path::{Path, PathBuf};

use parcel_protocol::Item;
use tracing::debug;

use crate::error::UploadError;

/// Scans `paths` in order and returns one item per file found.
///
/// Files within a directory are ordered by name so batches are reproducible.
pub fn scan_items(paths: &[PathBuf]) -> Result<Vec<Item>, UploadError> {
    let mut items = Vec::new();

    for path in paths {
        let metadata = std::fs::metadata(path)?;
        if metadata.is_dir() {
            let base = path.parent().unwrap_or(path);
            let start = items.len();
            walk_dir(base, path, &mut items)?;
            items[start..].sort_by(|a, b| a.name.cmp(&b.name));
        } else {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("{} has no file name", path.display()),
                    )
                })?;
            items.push(Item::from_file(name, path, metadata.len()));
        }
    }

    debug!(
        paths = paths.len(),
        items = items.len(),
        "scanned items for upload"
    );
    Ok(items)
}

fn walk_dir(base: &Path, current: &Path, items: &mut Vec<Item>) -> Result<(), UploadError> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(base, &path, items)?;
        } else if metadata.is_file() {
            let rel_path = path.strip_prefix(base).map_err(std::io::Error::other)?;
            let name = rel_path.to_string_lossy().replace('\\', "/");
            items.push(Item::from_file(name, &path, metadata.len()));
        }
    }

    Ok(())
}
