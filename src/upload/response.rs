//! Server payloads, validated once when they enter the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::errors::{Result, UploadError};
use super::types::UploadId;

/// Finalized artifact created by the server on the chunk that completes an upload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FileRecord {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub extension: String,
    pub path: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Paused,
    Done,
    Failed,
}

/// Server-side bookkeeping for an upload session; authoritative after a restart.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadRecord {
    pub id: u64,
    pub user_id: u64,
    pub file_name: String,
    #[serde(alias = "file_path")]
    pub path: String,
    pub identifier: UploadId,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let record: UploadRecord = serde_json::from_slice(body)
            .map_err(|err| UploadError::InvalidRecord(err.to_string()))?;
        record.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.total_chunks == 0 {
            return Err(UploadError::InvalidRecord(format!(
                "upload {} has no chunks",
                self.identifier
            )));
        }

        if self.uploaded_chunks > self.total_chunks {
            return Err(UploadError::InvalidRecord(format!(
                "upload {} reports {} of {} chunks",
                self.identifier, self.uploaded_chunks, self.total_chunks
            )));
        }

        Ok(self)
    }
}

/// What the server said about one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkResponse {
    /// Chunk accepted, more are expected
    Pending {
        identifier: UploadId,
        progress: u8,
        /// Server reported the session as paused
        paused: bool,
        uploaded_chunks: Option<u32>,
    },

    /// Last chunk accepted and the file finalized
    Done {
        file: FileRecord,
    },

    Failed {
        identifier: UploadId,
        progress: u8,
        reason: String,
    },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum RawChunkResponse {
    Pending {
        progress: i64,
        identifier: String,
        #[serde(default)]
        uploaded_chunks: Option<u32>,
    },
    Paused {
        progress: i64,
        identifier: String,
        #[serde(default)]
        uploaded_chunks: Option<u32>,
    },
    Done {
        file: FileRecord,
    },
    Failed {
        progress: i64,
        identifier: String,
        reason: String,
    },
}

fn percent(progress: i64) -> Result<u8> {
    if (0..=100).contains(&progress) {
        Ok(progress as u8)
    } else {
        Err(UploadError::malformed(format!("progress {} out of range", progress)))
    }
}

impl ChunkResponse {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw: RawChunkResponse = serde_json::from_slice(body)
            .map_err(|err| UploadError::malformed(err.to_string()))?;

        let response = match raw {
            RawChunkResponse::Pending { progress, identifier, uploaded_chunks } => {
                ChunkResponse::Pending {
                    identifier: identifier.into(),
                    progress: percent(progress)?,
                    paused: false,
                    uploaded_chunks,
                }
            }
            RawChunkResponse::Paused { progress, identifier, uploaded_chunks } => {
                ChunkResponse::Pending {
                    identifier: identifier.into(),
                    progress: percent(progress)?,
                    paused: true,
                    uploaded_chunks,
                }
            }
            RawChunkResponse::Done { file } => ChunkResponse::Done { file },
            RawChunkResponse::Failed { progress, identifier, reason } => {
                let reason = if reason.trim().is_empty() {
                    "server reported failure".to_string()
                } else {
                    reason
                };

                ChunkResponse::Failed {
                    identifier: identifier.into(),
                    progress: percent(progress)?,
                    reason,
                }
            }
        };

        Ok(response)
    }
}
