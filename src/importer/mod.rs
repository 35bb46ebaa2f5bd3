// ==========================================
// 树木导入系统 - 导入层
// ==========================================
// 职责: CSV 文件 → 导入行 → 分块校验 → 分块提交 → 目标记录
// 支持: 树种（species）、树木 + 样地（tree）
// ==========================================

// 模块声明
pub mod barrier;
pub mod error;
pub mod field_validator;
pub mod fields;
pub mod file_parser;
pub mod ingestion;
pub mod pipeline;
pub mod row_committer;
pub mod row_validator;
pub mod scheduler;
pub mod task_queue;
pub mod worker_runner;

// 重导出核心类型
pub use barrier::{BarrierOutcome, CompletionBarrier};
pub use error::{ImportError, ImportResult};
pub use fields::{FieldCatalog, FieldDescriptor, FieldRole, FieldType};
pub use file_parser::{CsvParser, CsvRowStream};
pub use ingestion::{IngestionOutcome, IngestionStage};
pub use pipeline::{parse_import_type, EventSummary, ImportPipeline, RowErrorReport};
pub use scheduler::{block_range, block_starts, schedule_blocks};

// 重导出 Trait 接口
pub use row_committer::RowCommitter;
pub use row_validator::{ReferenceLookup, RowValidator};
pub use task_queue::{
    ChannelTaskQueue, InlineTaskQueue, TaskQueue, UnitExecutor, UnitKind, WorkUnit, WorkerPool,
    WorkerPoolSummary,
};
pub use worker_runner::PooledImport;
