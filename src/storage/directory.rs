use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::service::StorageConfig;
use crate::session::CompletedUpload;
use crate::{AppError, AppResult};

use super::MediaStore;

/// File extension for an upload: the declared type/format pair when it is a known combination,
/// otherwise whatever the leading magic bytes say.
pub fn media_extension(media_type: u8, format: u8, payload: &[u8]) -> &'static str {
    match (media_type, format) {
        (0, 0) => return "jpg",
        (0, 1) => return "tif",
        (1, 2) => return "mp3",
        (1, 3) => return "wav",
        (2, 4) => return "wmv",
        _ => {}
    }
    match payload {
        [0xFF, 0xD8, ..] => "jpg",
        [0x89, 0x50, 0x4E, 0x47, ..] => "png",
        [0x52, 0x49, 0x46, 0x46, ..] => "wav",
        [0x00, 0x00, 0x00, 0x18, ..] => "mp4",
        _ => "bin",
    }
}

fn file_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

fn upload_path(base: &Path, upload: &CompletedUpload) -> PathBuf {
    let extension = media_extension(upload.media_type, upload.format, &upload.payload);
    let name = format!(
        "{}_{}_ch{}.{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        upload.data_id,
        upload.channel_id,
        extension
    );
    base.join(file_component(&upload.terminal_id)).join(name)
}

/// Writes uploads below `media_dir/<terminal id>/` from a dedicated writer task.
#[derive(Debug, Clone)]
pub struct DirectoryMediaStore {
    sender: async_channel::Sender<CompletedUpload>,
}

impl DirectoryMediaStore {
    /// Spawns the writer task. It runs until every clone of the store is dropped and the queue
    /// is drained.
    pub fn start(config: &StorageConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = async_channel::bounded(config.queue_capacity.max(1));
        let base = PathBuf::from(&config.media_dir);
        let writer = tokio::spawn(async move {
            debug!("media writer started for {}", base.display());
            while let Ok(upload) = receiver.recv().await {
                if let Err(err) = write_upload(&base, &upload).await {
                    error!(
                        terminal = %upload.terminal_id,
                        data_id = upload.data_id,
                        "failed to store multimedia upload: {}",
                        err
                    );
                }
            }
            debug!("media writer exited");
        });
        (DirectoryMediaStore { sender }, writer)
    }
}

async fn write_upload(base: &Path, upload: &CompletedUpload) -> AppResult<PathBuf> {
    let path = upload_path(base, upload);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            AppError::DetailedIoError(format!("create media dir {}: {}", dir.display(), e))
        })?;
    }
    tokio::fs::write(&path, &upload.payload)
        .await
        .map_err(|e| AppError::DetailedIoError(format!("write {}: {}", path.display(), e)))?;
    info!(
        terminal = %upload.terminal_id,
        data_id = upload.data_id,
        size = upload.payload.len(),
        "stored multimedia upload at {}",
        path.display()
    );
    Ok(path)
}

impl MediaStore for DirectoryMediaStore {
    fn store(&self, upload: CompletedUpload) -> AppResult<()> {
        self.sender.try_send(upload).map_err(|e| {
            AppError::ChannelSendError(format!("media queue: {}", e))
        })
    }
}
