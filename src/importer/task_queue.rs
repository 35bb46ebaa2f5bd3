// ==========================================
// 树木导入系统 - 任务分发
// ==========================================
// 职责: 分块工作单元的入队与执行
// 实现:
// - InlineTaskQueue: 进程内 FIFO，调用方同步排空（测试 / 命令行）
// - ChannelTaskQueue + WorkerPool: tokio 通道 + N 个 worker，
//   单元在 spawn_blocking 中执行，失败按 max_retries 重试（至少一次语义）
// 约束: 单元只携带原始值参数，可序列化后跨进程重投
// ==========================================

use crate::domain::ImportType;
use crate::importer::error::{ImportError, ImportResult};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 工作单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    ValidateBlock,
    CommitBlock,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::ValidateBlock => "validate_block",
            UnitKind::CommitBlock => "commit_block",
        }
    }
}

/// 分块工作单元
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    pub kind: UnitKind,
    pub import_type: ImportType,
    pub event_id: i64,
    pub block_start: i64,
}

impl WorkUnit {
    pub fn validate(import_type: ImportType, event_id: i64, block_start: i64) -> Self {
        Self {
            kind: UnitKind::ValidateBlock,
            import_type,
            event_id,
            block_start,
        }
    }

    pub fn commit(import_type: ImportType, event_id: i64, block_start: i64) -> Self {
        Self {
            kind: UnitKind::CommitBlock,
            import_type,
            event_id,
            block_start,
        }
    }
}

// ==========================================
// Trait 定义
// ==========================================

/// 入队接口
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, unit: WorkUnit) -> ImportResult<()>;
}

/// 单元执行接口（由管道实现）
pub trait UnitExecutor: Send + Sync {
    fn execute(&self, unit: &WorkUnit) -> ImportResult<()>;
}

// ==========================================
// InlineTaskQueue
// ==========================================
#[derive(Default)]
pub struct InlineTaskQueue {
    pending: Mutex<VecDeque<WorkUnit>>,
}

impl InlineTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出全部待执行单元（不执行），用于自定义调度顺序
    pub fn take_all(&self) -> ImportResult<Vec<WorkUnit>> {
        let mut pending = self.lock_pending()?;
        Ok(pending.drain(..).collect())
    }

    /// 按 FIFO 顺序同步执行，直到队列为空
    ///
    /// 单元失败时立即返回错误，剩余单元保留在队列中
    pub fn drain(&self, executor: &dyn UnitExecutor) -> ImportResult<usize> {
        let mut executed = 0;
        loop {
            // 执行期间不持锁，单元内部可再次入队
            let next = self.lock_pending()?.pop_front();
            let Some(unit) = next else {
                return Ok(executed);
            };
            executor.execute(&unit)?;
            executed += 1;
        }
    }

    fn lock_pending(&self) -> ImportResult<std::sync::MutexGuard<'_, VecDeque<WorkUnit>>> {
        self.pending
            .lock()
            .map_err(|e| ImportError::QueueError(format!("锁获取失败: {}", e)))
    }
}

impl TaskQueue for InlineTaskQueue {
    fn enqueue(&self, unit: WorkUnit) -> ImportResult<()> {
        self.lock_pending()?.push_back(unit);
        Ok(())
    }
}

// ==========================================
// ChannelTaskQueue
// ==========================================

/// 通道中的单元（带重试计数）
#[derive(Debug, Clone)]
pub struct QueuedUnit {
    pub unit_id: Uuid,
    pub unit: WorkUnit,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueuedUnit {
    pub fn new(unit: WorkUnit, max_retries: u32) -> Self {
        Self {
            unit_id: Uuid::new_v4(),
            unit,
            retry_count: 0,
            max_retries,
        }
    }

    /// 是否可以重试
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

pub struct ChannelTaskQueue {
    sender: Mutex<Option<UnboundedSender<QueuedUnit>>>,
    max_retries: u32,
}

impl ChannelTaskQueue {
    /// 创建队列，返回接收端供 WorkerPool 使用
    pub fn new(max_retries: u32) -> (Self, UnboundedReceiver<QueuedUnit>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
                max_retries,
            },
            rx,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// 关闭入队端；worker 处理完通道中剩余单元后退出
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

impl TaskQueue for ChannelTaskQueue {
    fn enqueue(&self, unit: WorkUnit) -> ImportResult<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|e| ImportError::QueueError(format!("锁获取失败: {}", e)))?;
        let sender = sender
            .as_ref()
            .ok_or_else(|| ImportError::QueueError("队列已关闭".to_string()))?;

        let queued = QueuedUnit::new(unit, self.max_retries);
        debug!(unit_id = %queued.unit_id, kind = unit.kind.as_str(), event_id = unit.event_id,
               block_start = unit.block_start, "单元入队");
        sender
            .send(queued)
            .map_err(|e| ImportError::QueueError(format!("通道已关闭: {}", e)))
    }
}

// ==========================================
// WorkerPool
// ==========================================

/// 工作池统计
#[derive(Debug, Default)]
pub struct WorkerPoolStats {
    pub succeeded: AtomicUsize,
    pub retried: AtomicUsize,
    pub failed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolSummary {
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerPoolStats>,
}

impl WorkerPoolStats {
    fn snapshot(&self) -> WorkerPoolSummary {
        WorkerPoolSummary {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl WorkerPool {
    /// 启动 worker_count 个 worker（需在 tokio 运行时内调用）
    pub fn start(
        executor: Arc<dyn UnitExecutor>,
        receiver: UnboundedReceiver<QueuedUnit>,
        worker_count: usize,
    ) -> Self {
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let stats = Arc::new(WorkerPoolStats::default());
        let worker_count = worker_count.max(1);

        info!(worker_count, "启动导入工作池");

        let handles = (0..worker_count)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let executor = Arc::clone(&executor);
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    Self::run_worker(worker_id, executor, receiver, stats).await;
                })
            })
            .collect();

        Self { handles, stats }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// 当前统计（运行中读取）
    pub fn snapshot(&self) -> WorkerPoolSummary {
        self.stats.snapshot()
    }

    async fn run_worker(
        worker_id: usize,
        executor: Arc<dyn UnitExecutor>,
        receiver: Arc<tokio::sync::Mutex<UnboundedReceiver<QueuedUnit>>>,
        stats: Arc<WorkerPoolStats>,
    ) {
        loop {
            let next = { receiver.lock().await.recv().await };
            let Some(mut queued) = next else {
                debug!(worker_id, "通道关闭，worker 退出");
                return;
            };

            loop {
                let exec = Arc::clone(&executor);
                let unit = queued.unit;
                let result = tokio::task::spawn_blocking(move || exec.execute(&unit))
                    .await
                    .unwrap_or_else(|e| Err(ImportError::QueueError(format!("单元执行中断: {}", e))));

                match result {
                    Ok(()) => {
                        stats.succeeded.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Err(e) if queued.can_retry() => {
                        queued.retry_count += 1;
                        stats.retried.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            worker_id,
                            unit_id = %queued.unit_id,
                            kind = unit.kind.as_str(),
                            event_id = unit.event_id,
                            block_start = unit.block_start,
                            retry_count = queued.retry_count,
                            error = %e,
                            "单元执行失败，重试"
                        );
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            worker_id,
                            unit_id = %queued.unit_id,
                            kind = unit.kind.as_str(),
                            event_id = unit.event_id,
                            block_start = unit.block_start,
                            error = %e,
                            "单元重试耗尽，放弃"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// 等待全部 worker 退出（先关闭队列）
    pub async fn join(self) -> WorkerPoolSummary {
        let results = join_all(self.handles).await;
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "worker 异常退出");
            }
        }

        let summary = self.stats.snapshot();
        info!(
            succeeded = summary.succeeded,
            retried = summary.retried,
            failed = summary.failed,
            "导入工作池已停止"
        );
        summary
    }
}
