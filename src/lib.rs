pub mod config;
pub mod logging;
pub mod upload;
pub mod utils;

pub use upload::{
    FileRecord,
    HttpTransport,
    ProgressAggregator,
    Result,
    UploadConfig,
    UploadError,
    UploadEvent,
    UploadId,
    UploadItem,
    UploadManager,
    UploadManagerHandle,
    UploadStatus,
    UploadTransport,
};
