use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::utils::retry::RetryPolicy;
use super::chunk::ChunkPlan;
use super::client::{ChunkRequest, UploadTransport};
use super::errors::UploadError;
use super::response::{ChunkResponse, FileRecord};
use super::types::UploadId;

/// 传输任务回报给管理器的事件
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Progress {
        progress: u8,
        uploaded_chunks: u32,
    },
    Retrying {
        chunk_index: u32,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    Done {
        file: FileRecord,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug)]
pub(crate) struct WorkerMessage {
    pub identifier: UploadId,
    /// 所属的运行批次，过期的回报会被管理器忽略
    pub run_id: u64,
    pub event: WorkerEvent,
}

/// 一次传输所需的全部信息
#[derive(Debug, Clone)]
pub(crate) struct TransferJob {
    pub identifier: UploadId,
    pub file_path: PathBuf,
    pub file_name: String,
    pub plan: ChunkPlan,
    /// 起始分片
    pub uploaded_chunks: u32,
}

pub(crate) struct UploadWorker {
    pub(crate) transport: Arc<dyn UploadTransport>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) retry: RetryPolicy,
    pub(crate) updates: mpsc::UnboundedSender<WorkerMessage>,
    pub(crate) run_id: u64,
}

impl UploadWorker {
    /// 从 `job.uploaded_chunks` 开始按顺序发送分片，直到服务器完成合并、任务失败或被取消
    pub async fn run(self, job: TransferJob) {
        let total = job.plan.total_chunks;
        // 全部已确认但未完成合并时重发最后一个分片
        let mut index = job.uploaded_chunks.min(total.saturating_sub(1));

        while index < total {
            if self.cancellation_token.is_cancelled() {
                debug!(identifier = %job.identifier, chunk_index = index, "transfer cancelled");
                return;
            }

            let payload = match job.plan.read_chunk(&job.file_path, index).await {
                Ok(payload) => payload,
                Err(err) => {
                    self.report(&job, WorkerEvent::Failed {
                        reason: format!("cannot read chunk {}: {}", index, err),
                    });
                    return;
                }
            };

            let request = ChunkRequest {
                identifier: job.identifier.clone(),
                file_name: job.file_name.clone(),
                chunk_index: index,
                total_chunks: total,
                payload,
            };

            let response = match self.send_with_retry(&job, request).await {
                Some(response) => response,
                None => return,
            };

            match response {
                ChunkResponse::Pending { identifier, progress, paused, uploaded_chunks } => {
                    if identifier != job.identifier {
                        self.report(&job, WorkerEvent::Failed {
                            reason: UploadError::malformed(format!(
                                "response for {} while uploading {}",
                                identifier, job.identifier
                            )).to_string(),
                        });
                        return;
                    }

                    if paused {
                        debug!(identifier = %job.identifier, "server reports session paused, continuing");
                    }

                    let uploaded_chunks = uploaded_chunks.unwrap_or(index + 1).min(total);
                    self.report(&job, WorkerEvent::Progress { progress, uploaded_chunks });
                }
                ChunkResponse::Done { file } => {
                    debug!(identifier = %job.identifier, file_id = file.id, "upload finalized");
                    self.report(&job, WorkerEvent::Done { file });
                    return;
                }
                ChunkResponse::Failed { reason, .. } => {
                    self.report(&job, WorkerEvent::Failed { reason });
                    return;
                }
            }

            index += 1;
        }

        if !self.cancellation_token.is_cancelled() {
            self.report(&job, WorkerEvent::Failed {
                reason: UploadError::malformed(format!(
                    "server did not finalize after chunk {} of {}",
                    total, total
                )).to_string(),
            });
        }
    }

    /// 传输已结束时返回 `None`（已取消，或失败且已上报）
    async fn send_with_retry(&self, job: &TransferJob, request: ChunkRequest) -> Option<ChunkResponse> {
        let chunk_index = request.chunk_index;
        let mut failures = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return None,
                result = self.transport.send_chunk(request.clone()) => result,
            };

            let error = match result {
                Ok(ChunkResponse::Failed { identifier, .. }) if identifier != job.identifier => {
                    UploadError::malformed(format!(
                        "failure for {} while uploading {}",
                        identifier, job.identifier
                    ))
                }
                Ok(ChunkResponse::Failed { reason, .. }) => UploadError::Rejected { reason },
                Ok(response) => return Some(response),
                Err(err) => err,
            };

            if !error.is_retryable() {
                warn!(identifier = %job.identifier, chunk_index, error = %error, "chunk failed permanently");
                self.report(job, WorkerEvent::Failed { reason: error.to_string() });
                return None;
            }

            failures += 1;
            let delay = match self.retry.next_delay(failures) {
                Some(delay) => delay,
                None => {
                    warn!(identifier = %job.identifier, chunk_index, attempts = failures, error = %error, "retry attempts exhausted");
                    self.report(job, WorkerEvent::Failed {
                        reason: format!("chunk {} failed after {} attempts: {}", chunk_index, failures, error),
                    });
                    return None;
                }
            };

            debug!(identifier = %job.identifier, chunk_index, attempt = failures, ?delay, error = %error, "retrying chunk");
            self.report(job, WorkerEvent::Retrying {
                chunk_index,
                attempt: failures,
                delay,
                reason: error.to_string(),
            });

            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn report(&self, job: &TransferJob, event: WorkerEvent) {
        if self.cancellation_token.is_cancelled() {
            return;
        }

        let _ = self.updates.send(WorkerMessage {
            identifier: job.identifier.clone(),
            run_id: self.run_id,
            event,
        });
    }
}
