// ==========================================
// 树木导入系统 - 导入错误码
// ==========================================
// 错误码写入 import_event.errors / import_row.errors（JSON），
// 对外暴露，需保持稳定
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// 稳定错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ===== 事件级（致命）=====
    UnrecognizedFieldName, // 表头含未知字段
    EmptyFile,             // 无数据行
    GenericError,          // 导入过程中的未预期错误

    // ===== 字段级 =====
    MissingField,  // 必填字段为空
    FloatError,    // 非数字
    IntError,      // 非整数
    PositiveError, // 正数字段为负
    BoolError,     // 无法识别的布尔值
    DateError,     // 日期格式错误
    StringTooLong, // 超过字段最大长度

    // ===== 引用匹配 =====
    InvalidSpecies, // 名称未匹配到任何树种
    InvalidOtmId,   // 样地 ID 不存在

    // ===== 警告（非致命）=====
    SpeciesDbhTooHigh,    // 胸径超过树种最大值
    SpeciesHeightTooHigh, // 树高超过树种最大值
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnrecognizedFieldName => "UNRECOGNIZED_FIELD_NAME",
            ErrorCode::EmptyFile => "EMPTY_FILE",
            ErrorCode::GenericError => "GENERIC_ERROR",
            ErrorCode::MissingField => "MISSING_FIELD",
            ErrorCode::FloatError => "FLOAT_ERROR",
            ErrorCode::IntError => "INT_ERROR",
            ErrorCode::PositiveError => "POSITIVE_ERROR",
            ErrorCode::BoolError => "BOOL_ERROR",
            ErrorCode::DateError => "DATE_ERROR",
            ErrorCode::StringTooLong => "STRING_TOO_LONG",
            ErrorCode::InvalidSpecies => "INVALID_SPECIES",
            ErrorCode::InvalidOtmId => "INVALID_OTM_ID",
            ErrorCode::SpeciesDbhTooHigh => "SPECIES_DBH_TOO_HIGH",
            ErrorCode::SpeciesHeightTooHigh => "SPECIES_HEIGHT_TOO_HIGH",
        }
    }

    /// 致命错误会使行进入 ERROR；警告只记录
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ErrorCode::SpeciesDbhTooHigh | ErrorCode::SpeciesHeightTooHigh
        )
    }

    /// 面向用户的描述
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::UnrecognizedFieldName => "无法识别的字段名",
            ErrorCode::EmptyFile => "文件没有数据行",
            ErrorCode::GenericError => "导入过程中发生未预期错误",
            ErrorCode::MissingField => "必填字段缺失",
            ErrorCode::FloatError => "不是有效数字",
            ErrorCode::IntError => "不是有效整数",
            ErrorCode::PositiveError => "正数字段不能为负",
            ErrorCode::BoolError => "无法识别的布尔值",
            ErrorCode::DateError => "日期格式错误",
            ErrorCode::StringTooLong => "字段长度超限",
            ErrorCode::InvalidSpecies => "未找到匹配的树种",
            ErrorCode::InvalidOtmId => "样地 ID 不存在",
            ErrorCode::SpeciesDbhTooHigh => "胸径超过该树种最大值",
            ErrorCode::SpeciesHeightTooHigh => "树高超过该树种最大值",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// EventError - 事件级错误
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventError {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl EventError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, data: None }
    }

    pub fn with_data(code: ErrorCode, data: serde_json::Value) -> Self {
        Self {
            code,
            data: Some(data),
        }
    }
}

// ==========================================
// RowError - 行级错误（按字段标注）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub code: ErrorCode,
    pub fields: Vec<String>, // 涉及的字段名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub fatal: bool,
}

impl RowError {
    pub fn new(code: ErrorCode, field: &str) -> Self {
        Self {
            code,
            fields: vec![field.to_string()],
            data: None,
            fatal: code.is_fatal(),
        }
    }

    pub fn for_fields(code: ErrorCode, fields: &[&str], data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            data,
            fatal: code.is_fatal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_warnings_are_not_fatal() {
        assert!(!ErrorCode::SpeciesDbhTooHigh.is_fatal());
        assert!(ErrorCode::FloatError.is_fatal());
        assert!(RowError::new(ErrorCode::PositiveError, "diameter").fatal);
    }

    #[test]
    fn test_event_error_json_shape() {
        let err = EventError::with_data(ErrorCode::GenericError, json!(["boom"]));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value, json!({"code": "GENERIC_ERROR", "data": ["boom"]}));

        let bare = serde_json::to_value(EventError::new(ErrorCode::EmptyFile)).unwrap();
        assert_eq!(bare, json!({"code": "EMPTY_FILE"}));
    }
}
