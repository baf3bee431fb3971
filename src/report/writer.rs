use std::path::{Path, PathBuf};

use crate::error::ReportError;

/// `{dir}/{warehouse}_{timestamp_ms}.png`
pub fn image_path(dir: &Path, warehouse: &str, timestamp_ms: i64) -> PathBuf {
    dir.join(format!("{}_{}.png", warehouse, timestamp_ms))
}

/// Write the image synchronously.  The directory must already exist and an
/// existing file is overwritten.
pub fn write_image(
    dir: &Path,
    warehouse: &str,
    timestamp_ms: i64,
    image: &[u8],
) -> Result<PathBuf, ReportError> {
    let path = image_path(dir, warehouse, timestamp_ms);
    std::fs::write(&path, image).map_err(|source| ReportError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
