// ==========================================
// 树木导入系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 这里只描述"调用方可见"的故障；
//       文件内容问题（表头/空文件/字段值）写入事件与行的错误列表，不走 Err
// ==========================================

use crate::domain::EventStatus;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    // ===== 管道错误 =====
    #[error("未知导入类型: {0}")]
    UnknownImportType(String),

    #[error("导入事件不存在: event_id={0}")]
    EventNotFound(i64),

    #[error("导入事件状态不允许该操作: event_id={event_id}, 当前={actual}, 期望={expected}")]
    InvalidEventStatus {
        event_id: i64,
        actual: EventStatus,
        expected: EventStatus,
    },

    #[error("导入类型与事件不一致: event_id={event_id}, 事件={actual}, 请求={requested}")]
    ImportTypeMismatch {
        event_id: i64,
        actual: String,
        requested: String,
    },

    #[error("任务入队失败: {0}")]
    QueueError(String),

    // ===== 数据库错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<rusqlite::Error>（经仓储错误分类）
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repository(RepositoryError::from(err))
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
