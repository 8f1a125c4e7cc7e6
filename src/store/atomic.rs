//! Write-to-temp-then-rename helper. A crash mid-write leaves the target
//! path at its pre-write contents (the temp file is orphaned, not the
//! target) or its post-write contents (after the rename completes) — never
//! a partial write, since `rename` on the same filesystem is atomic.

use std::path::Path;

use crate::errors::StoreError;

pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| StoreError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("session"),
        uuid::Uuid::new_v4()
    ));

    std::fs::write(&tmp_path, contents).map_err(|source| StoreError::WriteFailed {
        path: tmp_path.clone(),
        source,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|source| StoreError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
