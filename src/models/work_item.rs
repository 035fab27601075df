use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of a verification work item.
///
/// Items start `Pending` and make exactly one transition to a terminal
/// state, performed by the detection worker. A terminal status never reverts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Processed,
    Error,
}

impl WorkItemStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkItemStatus::Pending)
    }
}

/// An encoded image produced by a capture adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl CapturedImage {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            content_type: "image/jpeg".to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A persisted unit of asynchronous verification work.
#[derive(Debug, Clone)]
pub struct VerificationWorkItem {
    pub id: Uuid,
    pub payload: CapturedImage,
    pub status: WorkItemStatus,
    /// Number of detections; only meaningful once `status` is `Processed`.
    pub match_count: Option<u32>,
    pub error: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row state carried by a change notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItemChange {
    pub id: Uuid,
    pub status: WorkItemStatus,
    #[serde(default)]
    pub match_count: Option<u32>,
}

impl WorkItemChange {
    pub fn processed(id: Uuid, match_count: u32) -> Self {
        Self {
            id,
            status: WorkItemStatus::Processed,
            match_count: Some(match_count),
        }
    }

    pub fn errored(id: Uuid) -> Self {
        Self {
            id,
            status: WorkItemStatus::Error,
            match_count: None,
        }
    }
}

/// Returned by a successful dispatch; identifies the work item to correlate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItemHandle {
    pub id: Uuid,
}
