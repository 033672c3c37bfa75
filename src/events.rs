// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Progress notifications published by pipeline jobs

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Named notification channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "moveFilesNotifications")]
    MoveFiles,
    #[serde(rename = "refreshFilesNotifications")]
    RefreshFiles,
    #[serde(rename = "jobNotifications")]
    Jobs,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MoveFiles => "moveFilesNotifications",
            Self::RefreshFiles => "refreshFilesNotifications",
            Self::Jobs => "jobNotifications",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        [Self::MoveFiles, Self::RefreshFiles, Self::Jobs]
            .into_iter()
            .find(|c| c.as_str() == name)
    }
}

/// Per-item outcome codes on the move channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum MoveStatus {
    Moved = 0,
    Failed = 1,
    IdNotPresent = 2,
    Completed = 3,
}

/// Progress stages on the refresh channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum SyncStage {
    Scanning = 0,
    Classifying = 1,
    Persisting = 2,
    Completed = 3,
}

/// Lifecycle codes on the job channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum JobEvent {
    Started = 0,
    Finished = 1,
    Failed = 2,
    Cancelled = 3,
}

/// One published event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: Channel,
    /// Record id for item events, job id for job-level events
    pub subject: String,
    pub message: String,
    pub status: i32,
}

impl Notification {
    pub fn moved(subject: impl Into<String>, message: impl Into<String>, status: MoveStatus) -> Self {
        Self::new(Channel::MoveFiles, subject, message, status as i32)
    }

    pub fn refresh(subject: impl Into<String>, message: impl Into<String>, stage: SyncStage) -> Self {
        Self::new(Channel::RefreshFiles, subject, message, stage as i32)
    }

    pub fn job(subject: impl Into<String>, message: impl Into<String>, event: JobEvent) -> Self {
        Self::new(Channel::Jobs, subject, message, event as i32)
    }

    fn new(channel: Channel, subject: impl Into<String>, message: impl Into<String>, status: i32) -> Self {
        Self {
            channel,
            subject: subject.into(),
            message: message.into(),
            status,
        }
    }
}

/// Publish/subscribe hub
///
/// Delivery is in publish order per sender. Subscribers that connect late,
/// or lag past the buffer, miss events.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every live subscriber; no subscribers is not an error
    pub fn publish(&self, notification: Notification) {
        trace!(
            channel = notification.channel.as_str(),
            subject = %notification.subject,
            status = notification.status,
            "{}",
            notification.message
        );
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Subscribe to a single channel
    pub fn subscribe_channel(&self, channel: Channel) -> ChannelReceiver {
        ChannelReceiver {
            receiver: self.sender.subscribe(),
            channel,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver filtered to one channel
pub struct ChannelReceiver {
    receiver: broadcast::Receiver<Notification>,
    channel: Channel,
}

impl ChannelReceiver {
    /// Next event on the channel; `None` once the hub is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(n) if n.channel == self.channel => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Notification subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(n) if n.channel == self.channel => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
