// ==========================================
// 树木导入系统 - 领域模型层
// ==========================================
// 职责: 导入事件 / 导入行 / 错误码 / 目标实体
// 红线: 不含数据访问逻辑,不含管道调度逻辑
// ==========================================

pub mod error_code;
pub mod import_event;
pub mod import_row;
pub mod target;
pub mod types;

// 重导出核心类型
pub use error_code::{ErrorCode, EventError, RowError};
pub use import_event::ImportEvent;
pub use import_row::{CleanedRowData, FieldValue, ImportRow, RawRowData};
pub use target::{Plot, Species, SpeciesMatch, Tree};
pub use types::{EventStatus, ImportType, Phase, RowStatus};
