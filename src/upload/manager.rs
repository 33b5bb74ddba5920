use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use super::client::UploadTransport;
use super::errors::{Result, UploadError};
use super::manager_worker::UploadManagerWorker;
use super::response::FileRecord;
use super::types::{ManagerCommand, UploadConfig, UploadEvent, UploadId, UploadItem};

const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 256;

/// 上传管理器（可克隆的命令句柄）
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
    transport: Arc<dyn UploadTransport>,
}

/// 管理器和持有队列的后台任务
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// 取消所有进行中的传输，并等待后台任务退出
    pub async fn shutdown(self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.manager.command_tx.send(ManagerCommand::Shutdown { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }

        drop(self.manager);
        self.worker_handle.await
            .map_err(|err| UploadError::InternalError(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    pub fn new(transport: Arc<dyn UploadTransport>, config: UploadConfig) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let worker_handle = tokio::spawn(UploadManagerWorker::run(
            transport.clone(),
            config,
            command_rx,
            event_tx.clone(),
        ));

        let manager = Self {
            command_tx,
            event_tx,
            transport,
        };

        UploadManagerHandle {
            manager,
            worker_handle,
        }
    }

    async fn request<T>(&self, command: ManagerCommand, reply_rx: oneshot::Receiver<T>) -> Result<T> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        reply_rx
            .await
            .map_err(|_| UploadError::ManagerShutdown)
    }

    /// 添加上传任务，返回新生成的标识
    pub async fn enqueue(&self, file_path: impl Into<PathBuf>) -> Result<UploadId> {
        let (reply, reply_rx) = oneshot::channel();
        let file_path = file_path.into();
        self.request(ManagerCommand::Enqueue { file_path, reply }, reply_rx).await?
    }

    /// 批量添加，遇到第一个无法入队的文件即停止
    pub async fn enqueue_many<I, P>(&self, files: I) -> Result<Vec<UploadId>>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut identifiers = Vec::new();
        for file in files {
            identifiers.push(self.enqueue(file).await?);
        }
        Ok(identifiers)
    }

    /// 恢复上次会话未完成的上传
    ///
    /// 以服务器记录的已上传分片数为准继续传输，已确认的分片不会重发
    pub async fn restore(&self, identifier: UploadId, file_path: impl Into<PathBuf>) -> Result<UploadId> {
        let record = self.transport.fetch_upload(&identifier).await?;
        let (reply, reply_rx) = oneshot::channel();
        let file_path = file_path.into();
        self.request(ManagerCommand::Restore { file_path, record, reply }, reply_rx).await?
    }

    /// 暂停上传，保留已确认的分片数
    pub async fn pause(&self, identifier: &UploadId) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        let identifier = identifier.clone();
        self.request(ManagerCommand::Pause { identifier, reply }, reply_rx).await?
    }

    pub async fn resume(&self, identifier: &UploadId) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        let identifier = identifier.clone();
        self.request(ManagerCommand::Resume { identifier, reply }, reply_rx).await?
    }

    /// 取消上传（任意状态）
    pub async fn cancel(&self, identifier: &UploadId) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        let identifier = identifier.clone();
        self.request(ManagerCommand::Cancel { identifier, reply }, reply_rx).await?
    }

    /// 重试失败的任务
    pub async fn retry(&self, identifier: &UploadId) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        let identifier = identifier.clone();
        self.request(ManagerCommand::Retry { identifier, reply }, reply_rx).await?
    }

    /// 任务完成或取消后返回 `None`
    pub async fn get_item(&self, identifier: &UploadId) -> Result<Option<UploadItem>> {
        let (reply, reply_rx) = oneshot::channel();
        let identifier = identifier.clone();
        self.request(ManagerCommand::GetItem { identifier, reply }, reply_rx).await
    }

    /// 按入队顺序返回所有任务
    pub async fn items(&self) -> Result<Vec<UploadItem>> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::GetAllItems { reply }, reply_rx).await
    }

    pub async fn overall_progress(&self) -> Result<u8> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::OverallProgress { reply }, reply_rx).await
    }

    /// 开始新批次，重置 [`overall_progress`](Self::overall_progress) 的计数
    pub async fn new_batch(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::NewBatch { reply }, reply_rx).await
    }

    /// 服务器上已完成的文件列表
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        self.transport.list_files().await
    }

    /// 订阅事件
    ///
    /// 接收过慢会丢失事件（`RecvError::Lagged`）
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }
}
