use crate::error::ArchiveError;
use log::debug;
use serde::Serialize;
use std::path::Path;

/// True when `name` can be used as exactly one directory or file name.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Write `value` as pretty JSON to `path`, creating parent directories.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ArchiveError> {
    debug!("Writing {}", path.display());
    let body = serde_json::to_vec_pretty(value).map_err(|source| ArchiveError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ArchiveError::Snapshot {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|source| ArchiveError::Snapshot {
            path: path.to_path_buf(),
            source,
        })
}
