//! Resumable chunked uploads with a bounded, observable queue.

mod chunk;
mod client;
mod errors;
mod manager;
mod manager_worker;
mod progress_aggregator;
mod response;
mod status;
mod worker;
pub mod types;

pub use chunk::ChunkPlan;
pub use client::{
    ChunkRequest, HttpTransport, UploadTransport, DEFAULT_TIMEOUT,
    HEADER_CHUNK_INDEX, HEADER_FILE_NAME, HEADER_IDENTIFIER, HEADER_TOTAL_CHUNKS,
};
pub use errors::{Result, UploadError};
pub use manager::{UploadManager, UploadManagerHandle};
pub use progress_aggregator::ProgressAggregator;
pub use response::{ChunkResponse, FileRecord, RecordStatus, UploadRecord};
pub use types::{UploadConfig, UploadEvent, UploadId, UploadItem, UploadStatus};
