// ==========================================
// 树木导入系统 - 工作池驱动
// ==========================================
// 职责: 按导入配置组装 ChannelTaskQueue + WorkerPool + 管道，
//       驱动单个事件跑到非运行态
// 配置: worker_count → worker 数量；max_retries → 单元重试上限
// 约束: 需在 tokio 多线程运行时内使用
// ==========================================

use crate::config::ImportConfig;
use crate::domain::{EventStatus, ImportType, Phase};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::pipeline::ImportPipeline;
use crate::importer::task_queue::{
    ChannelTaskQueue, TaskQueue, UnitExecutor, WorkerPool, WorkerPoolSummary,
};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct PooledImport {
    pipeline: Arc<ImportPipeline>,
    queue: Arc<ChannelTaskQueue>,
    pool: WorkerPool,
    poll_interval: Duration,
}

impl PooledImport {
    /// 按配置启动工作池
    pub fn start(conn: Arc<Mutex<Connection>>, config: ImportConfig) -> Self {
        let (queue, receiver) = ChannelTaskQueue::new(config.max_retries);
        let queue = Arc::new(queue);
        let worker_count = config.worker_count;

        let shared_queue: Arc<dyn TaskQueue> = queue.clone();
        let pipeline = Arc::new(ImportPipeline::new(conn, config, shared_queue));
        let executor: Arc<dyn UnitExecutor> = pipeline.clone();
        let pool = WorkerPool::start(executor, receiver, worker_count);

        info!(
            worker_count = pool.worker_count(),
            max_retries = queue.max_retries(),
            "工作池导入已就绪"
        );

        Self {
            pipeline,
            queue,
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn pipeline(&self) -> &Arc<ImportPipeline> {
        &self.pipeline
    }

    pub fn queue(&self) -> &ChannelTaskQueue {
        &self.queue
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// 在阻塞线程中执行导入阶段，返回事件 ID
    pub async fn import_file(&self, import_type: ImportType, path: PathBuf) -> ImportResult<i64> {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || pipeline.import_file(import_type, &path))
            .await
            .map_err(|e| ImportError::QueueError(format!("导入任务中断: {}", e)))?
    }

    /// 等待事件离开运行态（VERIFYING / CREATING），返回最终状态
    ///
    /// 等待期间有单元重试耗尽时返回 QueueError；事件保持原状态，可由 reconcile 补偿
    pub async fn wait_until_settled(&self, event_id: i64) -> ImportResult<EventStatus> {
        let failed_before = self.pool.snapshot().failed;

        loop {
            let status = self.pipeline.events().get(event_id)?.status;
            if Phase::from_running_status(status).is_none() {
                debug!(event_id, status = %status, "事件已离开运行态");
                return Ok(status);
            }

            let failed = self.pool.snapshot().failed;
            if failed > failed_before {
                warn!(event_id, status = %status, failed = failed - failed_before, "分块单元重试耗尽");
                return Err(ImportError::QueueError(format!(
                    "事件 {} 有 {} 个分块单元重试耗尽，停留在 {}",
                    event_id,
                    failed - failed_before,
                    status
                )));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 关闭队列并等待 worker 退出
    pub async fn shutdown(self) -> WorkerPoolSummary {
        self.queue.close();
        self.pool.join().await
    }
}
