// ==========================================
// 树木导入系统 - 导入事件
// ==========================================
// 一次文件导入尝试的聚合记录
// 对齐: import_event 表
// ==========================================

use crate::domain::error_code::{ErrorCode, EventError};
use crate::domain::types::{EventStatus, ImportType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEvent {
    pub id: i64,
    pub import_type: ImportType,
    pub status: EventStatus,
    pub field_order: Vec<String>, // 原始表头（原样保留，用于回显/导出）
    pub row_count: i64,           // 导入时创建的行数，仅设置一次
    pub errors: Vec<EventError>,  // 事件级错误（有序）
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportEvent {
    /// 新建待导入事件（尚未落库，id=0）
    pub fn new(import_type: ImportType) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            import_type,
            status: EventStatus::Pending,
            field_order: Vec::new(),
            row_count: 0,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors_with_code(&self, code: ErrorCode) -> impl Iterator<Item = &EventError> {
        self.errors.iter().filter(move |e| e.code == code)
    }
}
