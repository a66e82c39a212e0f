use std::path::{Component, Path};

use crate::TransferError;

/// Validates an item name used as a path relative to a container.
///
/// Rejects empty names, absolute paths, `..` components and Windows
/// prefixes (`C:`, `\\server`), so the resolved path stays inside the
/// container.
pub fn validate_upload_path(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
        }
    }

    // "." or "./" names no file.
    if normal == 0 {
        return Err(TransferError::InvalidPath(format!("no file name: {name}")));
    }

    Ok(())
}
