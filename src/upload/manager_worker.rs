use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use super::chunk::ChunkPlan;
use super::client::UploadTransport;
use super::errors::{Result, UploadError};
use super::progress_aggregator::ProgressAggregator;
use super::response::{RecordStatus, UploadRecord};
use super::types::{ManagerCommand, UploadConfig, UploadEvent, UploadId, UploadItem, UploadStatus};
use super::worker::{TransferJob, UploadWorker, WorkerEvent, WorkerMessage};

struct TaskHandle {
    item: UploadItem,
    plan: ChunkPlan,
    /// 仅在传输进行中时存在
    cancellation_token: Option<CancellationToken>,
    run_id: u64,
}

/// 上传管理器工作线程
///
/// 独占队列，所有结构变更和传输回报的字段更新都在这个任务里串行处理
pub struct UploadManagerWorker {
    transport: Arc<dyn UploadTransport>,
    config: UploadConfig,
    tasks: HashMap<UploadId, TaskHandle>,
    /// 入队顺序，用于快照
    order: Vec<UploadId>,
    /// 等待传输槽位的任务
    ready: VecDeque<UploadId>,
    next_run_id: u64,
    aggregator: ProgressAggregator,

    event_tx: broadcast::Sender<UploadEvent>,
    update_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    update_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl UploadManagerWorker {
    pub(crate) async fn run(
        transport: Arc<dyn UploadTransport>,
        config: UploadConfig,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
    ) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            transport,
            config,
            tasks: HashMap::new(),
            order: Vec::new(),
            ready: VecDeque::new(),
            next_run_id: 0,
            aggregator: ProgressAggregator::new(),
            event_tx,
            update_rx,
            update_tx,
        };

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        worker.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => worker.handle_command(command).await,
                    None => {
                        worker.shutdown();
                        break;
                    }
                },
                Some(message) = worker.update_rx.recv() => {
                    worker.handle_update(message);
                }
            }

            worker.process_queue();
        }

        debug!("upload manager stopped");
    }

    fn active_uploads(&self) -> usize {
        self.tasks
            .values()
            .filter(|handle| handle.cancellation_token.is_some())
            .count()
    }

    /// 有空闲槽位时启动等待中的任务
    fn process_queue(&mut self) {
        let max_concurrent = self.config.max_concurrent.max(1);
        let mut active = self.active_uploads();

        while active < max_concurrent {
            let Some(identifier) = self.ready.pop_front() else {
                break;
            };

            if self.start_upload(&identifier) {
                active += 1;
            }
        }
    }

    fn start_upload(&mut self, identifier: &UploadId) -> bool {
        let handle = match self.tasks.get_mut(identifier) {
            Some(handle) => handle,
            None => return false,
        };

        if handle.cancellation_token.is_some() {
            return false;
        }

        let old_status = handle.item.status;
        match old_status {
            UploadStatus::Queued => handle.item.status = UploadStatus::Pending,
            UploadStatus::Pending => {}
            _ => return false,
        }

        let cancellation_token = CancellationToken::new();
        handle.cancellation_token = Some(cancellation_token.clone());
        self.next_run_id += 1;
        handle.run_id = self.next_run_id;
        handle.item.started_at.get_or_insert_with(chrono::Utc::now);

        let job = TransferJob {
            identifier: identifier.clone(),
            file_path: handle.item.file_path.clone(),
            file_name: handle.item.file_name.clone(),
            plan: handle.plan,
            uploaded_chunks: handle.item.uploaded_chunks,
        };

        let worker = UploadWorker {
            transport: self.transport.clone(),
            cancellation_token,
            retry: self.config.retry.clone(),
            updates: self.update_tx.clone(),
            run_id: handle.run_id,
        };

        debug!(identifier = %identifier, start_chunk = job.uploaded_chunks, total_chunks = job.plan.total_chunks, "transfer admitted");
        tokio::spawn(worker.run(job));

        if old_status != UploadStatus::Pending {
            self.emit(UploadEvent::StateChanged {
                identifier: identifier.clone(),
                old_status,
                new_status: UploadStatus::Pending,
            });
        }

        true
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Enqueue { file_path, reply } => {
                let result = self.enqueue(file_path).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Restore { file_path, record, reply } => {
                let result = self.restore(file_path, record).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Pause { identifier, reply } => {
                let _ = reply.send(self.pause(&identifier));
            }
            ManagerCommand::Resume { identifier, reply } => {
                let _ = reply.send(self.resume(&identifier));
            }
            ManagerCommand::Cancel { identifier, reply } => {
                let _ = reply.send(self.cancel(&identifier));
            }
            ManagerCommand::Retry { identifier, reply } => {
                let _ = reply.send(self.retry(&identifier));
            }
            ManagerCommand::GetItem { identifier, reply } => {
                let item = self.tasks
                    .get(&identifier)
                    .map(|handle| handle.item.clone());
                let _ = reply.send(item);
            }
            ManagerCommand::GetAllItems { reply } => {
                let items = self.order
                    .iter()
                    .filter_map(|identifier| self.tasks.get(identifier))
                    .map(|handle| handle.item.clone())
                    .collect();
                let _ = reply.send(items);
            }
            ManagerCommand::OverallProgress { reply } => {
                let _ = reply.send(self.aggregator.overall());
            }
            ManagerCommand::NewBatch { reply } => {
                self.emit(UploadEvent::BatchStarted { live: self.tasks.len() });
                let _ = reply.send(());
            }
            ManagerCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    async fn inspect_file(&self, file_path: &Path) -> Result<(String, u64, ChunkPlan)> {
        let metadata = tokio::fs::metadata(file_path).await?;
        if !metadata.is_file() {
            return Err(UploadError::InvalidFile(format!("{} is not a file", file_path.display())));
        }

        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::InvalidFile(format!("{} has no file name", file_path.display())))?;

        let plan = ChunkPlan::new(metadata.len(), self.config.chunk_size)?;
        Ok((file_name, metadata.len(), plan))
    }

    fn insert_item(&mut self, item: UploadItem, plan: ChunkPlan) {
        let identifier = item.identifier.clone();
        let progress = item.progress;
        let uploaded_chunks = item.uploaded_chunks;

        self.tasks.insert(identifier.clone(), TaskHandle {
            item,
            plan,
            cancellation_token: None,
            run_id: 0,
        });
        self.order.push(identifier.clone());
        self.ready.push_back(identifier.clone());

        self.emit(UploadEvent::Enqueued { identifier: identifier.clone() });
        if uploaded_chunks > 0 {
            self.emit(UploadEvent::Progress { identifier, progress, uploaded_chunks });
        }
    }

    async fn enqueue(&mut self, file_path: PathBuf) -> Result<UploadId> {
        let (file_name, file_size, plan) = self.inspect_file(&file_path).await?;

        let identifier = UploadId::new();
        let item = UploadItem {
            identifier: identifier.clone(),
            file_path,
            file_name,
            file_size,
            status: UploadStatus::Queued,
            progress: 0,
            uploaded_chunks: 0,
            total_chunks: plan.total_chunks,
            retry_count: 0,
            error: None,
            file: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        };

        info!(identifier = %identifier, file = %item.file_name, total_chunks = plan.total_chunks, "upload enqueued");
        self.insert_item(item, plan);

        Ok(identifier)
    }

    /// 恢复服务器上已有分片的上传
    async fn restore(&mut self, file_path: PathBuf, record: UploadRecord) -> Result<UploadId> {
        if self.tasks.contains_key(&record.identifier) {
            return Err(UploadError::ParamError(format!("{} is already queued", record.identifier)));
        }

        if record.status == RecordStatus::Done {
            return Err(UploadError::ParamError(format!("{} is already complete", record.identifier)));
        }

        let (file_name, file_size, plan) = self.inspect_file(&file_path).await?;
        if plan.total_chunks != record.total_chunks {
            return Err(UploadError::InvalidRecord(format!(
                "server expects {} chunks for {}, local file has {}",
                record.total_chunks, record.identifier, plan.total_chunks
            )));
        }

        let progress = (record.uploaded_chunks as u64 * 100 / record.total_chunks as u64) as u8;
        let identifier = record.identifier.clone();
        let item = UploadItem {
            identifier: identifier.clone(),
            file_path,
            file_name,
            file_size,
            status: UploadStatus::Queued,
            progress,
            uploaded_chunks: record.uploaded_chunks,
            total_chunks: plan.total_chunks,
            retry_count: 0,
            error: None,
            file: None,
            created_at: record.created_at,
            started_at: None,
            completed_at: None,
        };

        info!(identifier = %identifier, uploaded_chunks = record.uploaded_chunks, total_chunks = record.total_chunks, "upload restored");
        self.insert_item(item, plan);

        Ok(identifier)
    }

    fn handle_mut(&mut self, identifier: &UploadId) -> Result<&mut TaskHandle> {
        self.tasks
            .get_mut(identifier)
            .ok_or_else(|| UploadError::NotFound(identifier.clone()))
    }

    fn pause(&mut self, identifier: &UploadId) -> Result<()> {
        let handle = self.handle_mut(identifier)?;
        let old_status = handle.item.status;
        handle.item.status = old_status.transition(identifier, UploadStatus::Paused)?;

        // uploaded_chunks 保持服务器最后确认的值
        if let Some(token) = handle.cancellation_token.take() {
            token.cancel();
        }

        self.ready.retain(|id| id != identifier);
        debug!(identifier = %identifier, "upload paused");
        self.emit(UploadEvent::StateChanged {
            identifier: identifier.clone(),
            old_status,
            new_status: UploadStatus::Paused,
        });

        Ok(())
    }

    fn resume(&mut self, identifier: &UploadId) -> Result<()> {
        let handle = self.handle_mut(identifier)?;
        let old_status = handle.item.status;
        if old_status != UploadStatus::Paused {
            return Err(UploadError::InvalidTransition {
                identifier: identifier.clone(),
                from: old_status,
                to: UploadStatus::Pending,
            });
        }
        handle.item.status = old_status.transition(identifier, UploadStatus::Pending)?;

        self.ready.push_back(identifier.clone());
        debug!(identifier = %identifier, "upload resumed");
        self.emit(UploadEvent::StateChanged {
            identifier: identifier.clone(),
            old_status,
            new_status: UploadStatus::Pending,
        });

        Ok(())
    }

    fn retry(&mut self, identifier: &UploadId) -> Result<()> {
        let handle = self.handle_mut(identifier)?;
        let old_status = handle.item.status;
        if old_status != UploadStatus::Failed {
            return Err(UploadError::InvalidTransition {
                identifier: identifier.clone(),
                from: old_status,
                to: UploadStatus::Pending,
            });
        }
        handle.item.status = old_status.transition(identifier, UploadStatus::Pending)?;
        handle.item.retry_count = 0;
        handle.item.error = None;

        self.ready.push_back(identifier.clone());
        info!(identifier = %identifier, "upload retried");
        self.emit(UploadEvent::StateChanged {
            identifier: identifier.clone(),
            old_status,
            new_status: UploadStatus::Pending,
        });

        Ok(())
    }

    fn cancel(&mut self, identifier: &UploadId) -> Result<()> {
        let handle = self.tasks
            .remove(identifier)
            .ok_or_else(|| UploadError::NotFound(identifier.clone()))?;

        if let Some(token) = handle.cancellation_token {
            token.cancel();
        }

        self.ready.retain(|id| id != identifier);
        self.order.retain(|id| id != identifier);

        info!(identifier = %identifier, "upload cancelled");
        self.emit(UploadEvent::Cancelled { identifier: identifier.clone() });

        Ok(())
    }

    fn handle_update(&mut self, message: WorkerMessage) {
        let WorkerMessage { identifier, run_id, event } = message;

        let handle = match self.tasks.get_mut(&identifier) {
            Some(handle) => handle,
            None => return,
        };

        // 传输开始后已被暂停、取消或重新启动
        if handle.run_id != run_id || handle.cancellation_token.is_none() {
            debug!(identifier = %identifier, run_id, "dropping stale transfer update");
            return;
        }

        match event {
            WorkerEvent::Progress { progress, uploaded_chunks } => {
                let item = &mut handle.item;
                item.progress = item.progress.max(progress);
                item.uploaded_chunks = item.uploaded_chunks.max(uploaded_chunks).min(item.total_chunks);
                item.retry_count = 0;

                let event = UploadEvent::Progress {
                    identifier,
                    progress: item.progress,
                    uploaded_chunks: item.uploaded_chunks,
                };
                self.emit(event);
            }
            WorkerEvent::Retrying { chunk_index, attempt, delay, reason } => {
                handle.item.retry_count = attempt;
                self.emit(UploadEvent::Retrying { identifier, chunk_index, attempt, delay, reason });
            }
            WorkerEvent::Done { file } => {
                let old_status = handle.item.status;
                if let Err(err) = old_status.transition(&identifier, UploadStatus::Done) {
                    warn!(error = %err, "ignoring completion");
                    return;
                }

                handle.cancellation_token = None;
                let raised = handle.item.progress < 100;
                let item = &mut handle.item;
                item.status = UploadStatus::Done;
                item.progress = 100;
                item.uploaded_chunks = item.total_chunks;
                item.retry_count = 0;
                item.completed_at = Some(chrono::Utc::now());
                item.file = Some(file.clone());
                let total_chunks = item.total_chunks;

                if raised {
                    self.emit(UploadEvent::Progress {
                        identifier: identifier.clone(),
                        progress: 100,
                        uploaded_chunks: total_chunks,
                    });
                }
                self.emit(UploadEvent::StateChanged {
                    identifier: identifier.clone(),
                    old_status,
                    new_status: UploadStatus::Done,
                });

                // 完成的任务移出队列
                self.order.retain(|id| id != &identifier);
                if let Some(handle) = self.tasks.remove(&identifier) {
                    info!(identifier = %identifier, url = %file.url, "upload complete");
                    self.emit(UploadEvent::Completed { item: handle.item, file });
                }
            }
            WorkerEvent::Failed { reason } => {
                let old_status = handle.item.status;
                if let Err(err) = old_status.transition(&identifier, UploadStatus::Failed) {
                    warn!(error = %err, "ignoring failure");
                    return;
                }

                handle.cancellation_token = None;
                handle.item.status = UploadStatus::Failed;
                handle.item.error = Some(reason.clone());

                warn!(identifier = %identifier, reason = %reason, "upload failed");
                self.emit(UploadEvent::StateChanged {
                    identifier: identifier.clone(),
                    old_status,
                    new_status: UploadStatus::Failed,
                });
                self.emit(UploadEvent::Failed { identifier, reason });
            }
        }
    }

    /// 先通知聚合器，再广播给订阅者
    fn emit(&mut self, event: UploadEvent) {
        let changed = self.aggregator.apply(&event);
        let _ = self.event_tx.send(event);

        if let Some(percent) = changed {
            let _ = self.event_tx.send(UploadEvent::OverallProgress { percent });
        }
    }

    fn shutdown(&mut self) {
        for handle in self.tasks.values_mut() {
            if let Some(token) = handle.cancellation_token.take() {
                token.cancel();
            }
        }
        self.ready.clear();
    }
}
