use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::SnapshotError;
use crate::report::Snapshot;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "snapshot".into());
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_staging(staging: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(staging).await?;
    file.write_all(body).await?;
    file.sync_all().await
}

pub async fn publish(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let body = serde_json::to_vec(snapshot)?;
    let staging = staging_path(path);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_error(parent))?;
    }

    let moved = match write_staging(&staging, &body).await {
        Ok(()) => tokio::fs::rename(&staging, path)
            .await
            .map_err(io_error(path)),
        Err(err) => Err(io_error(&staging)(err)),
    };
    if let Err(err) = moved {
        if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %cleanup, "failed to remove staging file");
            }
        }
        return Err(err);
    }

    info!(path = %path.display(), employees = snapshot.len(), "snapshot published");
    Ok(())
}

pub async fn load(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    let body = match tokio::fs::read(path).await {
        Ok(body) => body,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(path)(err)),
    };
    Ok(Some(serde_json::from_slice(&body)?))
}
