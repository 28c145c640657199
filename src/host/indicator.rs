use super::{read_json, write_json_atomic};
use crate::constants::{STATUS_CHANNEL_ID, STATUS_CHANNEL_NAME, STATUS_NOTIFICATION_ID};
use crate::error::AppError;
use crate::unix_millis;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Default,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub importance: Importance,
}

impl NotificationChannel {
    /// The low-importance channel the host's status lives on.
    pub fn status() -> Self {
        Self {
            id: STATUS_CHANNEL_ID.to_string(),
            name: STATUS_CHANNEL_NAME.to_string(),
            importance: Importance::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotification {
    pub id: u32,
    pub channel_id: String,
    pub title: String,
    pub text: String,
    /// Not dismissible by the user while shown.
    pub ongoing: bool,
}

impl StatusNotification {
    pub fn running() -> Self {
        Self {
            id: STATUS_NOTIFICATION_ID,
            channel_id: STATUS_CHANNEL_ID.to_string(),
            title: "Snooper".to_string(),
            text: "Monitoring the foreground app".to_string(),
            ongoing: true,
        }
    }
}

/// Visible liveness indicator the host holds while it runs.
pub trait StatusIndicator: Send + Sync {
    /// Creating a channel that already exists is a no-op.
    fn create_channel(&self, channel: &NotificationChannel) -> Result<(), AppError>;

    fn show(&self, notification: &StatusNotification) -> Result<(), AppError>;

    fn clear(&self, id: u32) -> Result<(), AppError>;
}

/// What [`StatusFile`] keeps on disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub channel: Option<NotificationChannel>,
    pub notification: Option<StatusNotification>,
    pub updated_at: i64,
}

/// Status indicator kept as a JSON file that desktop widgets or `snooper status` can read.
/// The file only exists while a notification is shown or a channel is set up.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<StatusRecord>, AppError> {
        read_json(&self.path)
    }

    fn update(&self, f: impl FnOnce(&mut StatusRecord)) -> Result<(), AppError> {
        let mut record = self.read()?.unwrap_or_default();
        f(&mut record);
        record.updated_at = unix_millis();
        write_json_atomic(&self.path, &record)
    }
}

impl StatusIndicator for StatusFile {
    fn create_channel(&self, channel: &NotificationChannel) -> Result<(), AppError> {
        if let Some(existing) = self.read()?.and_then(|r| r.channel) {
            if existing.id == channel.id {
                debug!("Notification channel {} already exists", channel.id);
                return Ok(());
            }
        }
        self.update(|record| record.channel = Some(channel.clone()))
    }

    fn show(&self, notification: &StatusNotification) -> Result<(), AppError> {
        self.update(|record| record.notification = Some(notification.clone()))
    }

    fn clear(&self, id: u32) -> Result<(), AppError> {
        let Some(record) = self.read()? else {
            return Ok(());
        };
        if record.notification.as_ref().is_some_and(|n| n.id != id) {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_show_and_clear() {
        let dir = tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("status.json"));

        status.create_channel(&NotificationChannel::status()).unwrap();
        status.show(&StatusNotification::running()).unwrap();

        let record = status.read().unwrap().unwrap();
        assert_eq!(record.channel, Some(NotificationChannel::status()));
        let notification = record.notification.unwrap();
        assert!(notification.ongoing);
        assert_eq!(notification.channel_id, STATUS_CHANNEL_ID);

        status.clear(STATUS_NOTIFICATION_ID).unwrap();
        assert!(!status.path().exists());
        assert_eq!(status.read().unwrap(), None);
    }

    #[test]
    fn test_create_channel_twice_is_a_no_op() {
        let dir = tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("status.json"));

        status.create_channel(&NotificationChannel::status()).unwrap();
        let first = status.read().unwrap().unwrap();
        status.create_channel(&NotificationChannel::status()).unwrap();
        assert_eq!(status.read().unwrap().unwrap(), first);
    }

    #[test]
    fn test_clear_ignores_other_ids_and_missing_file() {
        let dir = tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("status.json"));
        status.clear(STATUS_NOTIFICATION_ID).unwrap();

        status.show(&StatusNotification::running()).unwrap();
        status.clear(STATUS_NOTIFICATION_ID + 1).unwrap();
        assert!(status.path().exists());
    }
}
