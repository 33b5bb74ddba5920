use std::path::PathBuf;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use crate::utils::retry::{RetryPolicy, RetryStrategy};
use super::errors::Result;
use super::response::{FileRecord, UploadRecord};

/// 5 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Opaque token correlating every chunk request of one upload session.
///
/// Generated client-side on enqueue, or taken from the server when an
/// upload is restored after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for UploadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UploadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Waiting for its first transfer slot
    Queued,
    /// Admitted; transferring or waiting to be re-admitted after resume/retry
    Pending,
    Paused,
    Failed,
    Done,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UploadStatus::Queued => "queued",
            UploadStatus::Pending => "pending",
            UploadStatus::Paused => "paused",
            UploadStatus::Failed => "failed",
            UploadStatus::Done => "done",
        };
        f.write_str(name)
    }
}

/// Client-side view of one upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadItem {
    pub identifier: UploadId,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub status: UploadStatus,
    /// Server-confirmed percentage, 0..=100
    pub progress: u8,
    /// Chunks the server has acknowledged; may lag behind `progress`
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    /// Consecutive failed attempts on the current chunk
    pub retry_count: u32,
    pub error: Option<String>,
    pub file: Option<FileRecord>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Item appended to the queue
    Enqueued {
        identifier: UploadId,
    },

    StateChanged {
        identifier: UploadId,
        old_status: UploadStatus,
        new_status: UploadStatus,
    },

    /// Server-confirmed progress for one item
    Progress {
        identifier: UploadId,
        progress: u8,
        uploaded_chunks: u32,
    },

    /// A chunk failed and will be sent again after `delay`
    Retrying {
        identifier: UploadId,
        chunk_index: u32,
        attempt: u32,
        delay: Duration,
        reason: String,
    },

    /// Item reached `done` and left the live queue
    Completed {
        item: UploadItem,
        file: FileRecord,
    },

    Failed {
        identifier: UploadId,
        reason: String,
    },

    /// Item removed by the caller
    Cancelled {
        identifier: UploadId,
    },

    /// Aggregate counters reset; `live` items carried into the new batch
    BatchStarted {
        live: usize,
    },

    /// Aggregate progress across the batch, 0..=100
    OverallProgress {
        percent: u8,
    },
}

pub enum ManagerCommand {
    Enqueue {
        file_path: PathBuf,
        reply: oneshot::Sender<Result<UploadId>>,
    },

    /// Re-create an item for an upload the server already knows about
    Restore {
        file_path: PathBuf,
        record: UploadRecord,
        reply: oneshot::Sender<Result<UploadId>>,
    },

    Pause {
        identifier: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },

    Resume {
        identifier: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },

    Cancel {
        identifier: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },

    Retry {
        identifier: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },

    GetItem {
        identifier: UploadId,
        reply: oneshot::Sender<Option<UploadItem>>,
    },

    GetAllItems {
        reply: oneshot::Sender<Vec<UploadItem>>,
    },

    OverallProgress {
        reply: oneshot::Sender<u8>,
    },

    NewBatch {
        reply: oneshot::Sender<()>,
    },

    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Bytes per chunk; the last chunk may be shorter
    pub chunk_size: usize,

    /// Upper bound on simultaneously active transfers
    pub max_concurrent: usize,

    /// Per-chunk retry bound and backoff
    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            retry: RetryPolicy {
                max_attempts: 3,
                strategy: RetryStrategy::Exponential {
                    initial: Duration::from_secs(1),
                    multiplier: 2.0,
                    max_delay: Duration::from_secs(30),
                },
            },
        }
    }
}

// Items and events cross task boundaries
const _: () = {
    const fn assert_send<T: Send>() {}
    assert_send::<UploadItem>();
    assert_send::<UploadEvent>();
    assert_send::<ManagerCommand>();
};
