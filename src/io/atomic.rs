//! Atomic file replacement.
//!
//! Every output goes to a temporary file in the destination directory and is
//! then renamed over the target. A concurrent reader sees either the old file
//! or the complete new one, and a failed write leaves nothing behind.

use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::AppError;

/// Write `path` atomically using the `write` callback.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), AppError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), AppError>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
        AppError::io(format!("Failed to create temporary file in '{}': {e}", dir.display()))
    })?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer
            .flush()
            .map_err(|e| AppError::io(format!("Failed to write '{}': {e}", path.display())))?;
    }

    tmp.persist(path)
        .map_err(|e| AppError::io(format!("Failed to move output into '{}': {}", path.display(), e.error)))?;
    Ok(())
}
