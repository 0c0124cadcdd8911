//! Reading and writing log files

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::error::LogError;
use crate::event_log::EventLog;

/// Write `log` to `path`
///
/// The log is written to a sibling temporary file, synced and renamed into
/// place, so readers never observe a partially written log.
#[instrument(skip_all, fields(path = %path.as_ref().display(), events = log.len()))]
pub async fn write_log(path: impl AsRef<Path>, log: &EventLog) -> Result<(), LogError> {
    let path = path.as_ref();
    let bytes = log.encode()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = temp_path(path);
    let mut file = File::create(&tmp_path).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await?;

    info!(bytes = bytes.len(), "Wrote event log");
    Ok(())
}

/// Read and decode the log at `path`
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn read_log(path: impl AsRef<Path>) -> Result<EventLog, LogError> {
    let data = fs::read(path.as_ref()).await?;
    debug!(bytes = data.len(), "Read log file");
    EventLog::decode(&data)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
