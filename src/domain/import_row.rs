// ==========================================
// 树木导入系统 - 导入行
// ==========================================
// 文件中的一条源记录 + 生命周期状态 + 累积错误
// 对齐: import_row 表，(event_id, idx) 唯一
// ==========================================

use crate::domain::error_code::RowError;
use crate::domain::types::RowStatus;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 原始行数据: 规范化字段名 → 原始字符串
pub type RawRowData = BTreeMap<String, String>;

/// 校验后数据: 字段名（含伪字段）→ 类型化值
pub type CleanedRowData = BTreeMap<String, FieldValue>;

// ==========================================
// FieldValue - 校验后的类型化字段值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Date(NaiveDate),
    // ===== 伪字段取值 =====
    Point { x: f64, y: f64 },  // 坐标对
    SpeciesMatches(Vec<i64>),  // 同名既有树种 ID 列表
    SpeciesRef(i64),           // 匹配到的树种 ID
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::SpeciesRef(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

// ==========================================
// ImportRow - 导入行
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    pub id: i64,
    pub event_id: i64,          // 所属事件（按 ID 引用）
    pub idx: i64,               // 文件内 0 起始位置，用于分块寻址
    pub data: RawRowData,       // 原始值
    pub cleaned: CleanedRowData, // 校验结果（类型化值 + 伪字段）
    pub errors: Vec<RowError>,  // 字段级错误标注
    pub status: RowStatus,
    pub target_id: Option<i64>, // 提交产生的目标记录 ID（样地 / 树种）
}

impl ImportRow {
    /// 新建待校验行（尚未落库，id=0）
    pub fn new(event_id: i64, idx: i64, data: RawRowData) -> Self {
        Self {
            id: 0,
            event_id,
            idx,
            data,
            cleaned: CleanedRowData::new(),
            errors: Vec::new(),
            status: RowStatus::Waiting,
            target_id: None,
        }
    }

    pub fn has_fatal_errors(&self) -> bool {
        self.errors.iter().any(|e| e.fatal)
    }

    pub fn is_committed(&self) -> bool {
        self.target_id.is_some()
    }

    /// 待提交: 校验通过且尚未产生目标记录
    pub fn is_pending_commit(&self) -> bool {
        self.status == RowStatus::Valid && self.target_id.is_none()
    }

    pub fn cleaned_f64(&self, field: &str) -> Option<f64> {
        self.cleaned.get(field).and_then(FieldValue::as_f64)
    }

    pub fn cleaned_text(&self, field: &str) -> Option<String> {
        self.cleaned
            .get(field)
            .and_then(FieldValue::as_text)
            .map(str::to_string)
    }

    pub fn cleaned_bool(&self, field: &str) -> Option<bool> {
        self.cleaned.get(field).and_then(FieldValue::as_bool)
    }
}
