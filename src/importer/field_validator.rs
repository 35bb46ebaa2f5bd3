// ==========================================
// 树木导入系统 - 字段类型校验器
// ==========================================
// 职责: 原始字符串 → 类型化值 / 稳定错误码
// 规则:
// - 空值（trim 后）视为"未提供"，仅必填字段报 MISSING_FIELD
// - 按 FieldType 穷举分派，新增类型必须在此补齐
// ==========================================

use crate::domain::{ErrorCode, FieldValue};
use crate::importer::fields::{FieldDescriptor, FieldRole, FieldType};
use chrono::NaiveDate;

/// 单字段解析函数
type ParseFn = fn(&str, &FieldDescriptor, &str) -> Result<FieldValue, ErrorCode>;

/// 布尔真值（小写比较）
const TRUE_VALUES: [&str; 5] = ["true", "t", "yes", "y", "1"];
/// 布尔假值（小写比较）
const FALSE_VALUES: [&str; 5] = ["false", "f", "no", "n", "0"];

/// 类型 → 解析函数
fn parser_for(field_type: FieldType) -> ParseFn {
    match field_type {
        FieldType::String => parse_string,
        FieldType::Date => parse_date,
        FieldType::Boolean => parse_boolean,
        FieldType::PositiveInteger => parse_positive_integer,
        FieldType::PositiveFloat => parse_positive_float,
        FieldType::Float => parse_float,
    }
}

/// 校验单个字段
///
/// # 参数
/// - descriptor: 字段描述
/// - raw: 原始值（None 表示该列不存在）
/// - date_format: 日期字段使用的 chrono 格式串
///
/// # 返回
/// - Ok(None): 未提供（且非必填）
/// - Ok(Some(v)): 类型化值
/// - Err(code): 校验失败
pub fn validate_field(
    descriptor: &FieldDescriptor,
    raw: Option<&str>,
    date_format: &str,
) -> Result<Option<FieldValue>, ErrorCode> {
    if descriptor.role == FieldRole::Pseudo {
        return Ok(None);
    }

    let value = raw.map(str::trim).unwrap_or("");
    if value.is_empty() {
        if descriptor.required {
            return Err(ErrorCode::MissingField);
        }
        return Ok(None);
    }

    parser_for(descriptor.field_type)(value, descriptor, date_format).map(Some)
}

fn parse_string(value: &str, descriptor: &FieldDescriptor, _: &str) -> Result<FieldValue, ErrorCode> {
    if let Some(max) = descriptor.max_length {
        if value.chars().count() > max {
            return Err(ErrorCode::StringTooLong);
        }
    }
    Ok(FieldValue::Text(value.to_string()))
}

fn parse_date(value: &str, _: &FieldDescriptor, date_format: &str) -> Result<FieldValue, ErrorCode> {
    NaiveDate::parse_from_str(value, date_format)
        .map(FieldValue::Date)
        .map_err(|_| ErrorCode::DateError)
}

fn parse_boolean(value: &str, _: &FieldDescriptor, _: &str) -> Result<FieldValue, ErrorCode> {
    let lowered = value.to_lowercase();
    if TRUE_VALUES.contains(&lowered.as_str()) {
        Ok(FieldValue::Boolean(true))
    } else if FALSE_VALUES.contains(&lowered.as_str()) {
        Ok(FieldValue::Boolean(false))
    } else {
        Err(ErrorCode::BoolError)
    }
}

fn parse_finite(value: &str) -> Result<f64, ErrorCode> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ErrorCode::FloatError),
    }
}

fn parse_float(value: &str, _: &FieldDescriptor, _: &str) -> Result<FieldValue, ErrorCode> {
    parse_finite(value).map(FieldValue::Float)
}

fn parse_positive_float(value: &str, _: &FieldDescriptor, _: &str) -> Result<FieldValue, ErrorCode> {
    let v = parse_finite(value)?;
    if v < 0.0 {
        return Err(ErrorCode::PositiveError);
    }
    Ok(FieldValue::Float(v))
}

fn parse_positive_integer(value: &str, _: &FieldDescriptor, _: &str) -> Result<FieldValue, ErrorCode> {
    let v = value.parse::<i64>().map_err(|_| ErrorCode::IntError)?;
    if v < 0 {
        return Err(ErrorCode::PositiveError);
    }
    Ok(FieldValue::Integer(v))
}
