// ==========================================
// 树木导入系统 - JSON 列工具
// ==========================================
// 职责: import_event / import_row 的 JSON 列读写
// 与 decision 风格不同: 解析失败不吞掉，转换为 rusqlite 转换错误
// ==========================================

use rusqlite::types::Type;
use rusqlite::Row;
use serde::{de::DeserializeOwned, Serialize};

/// 读取 TEXT 列并按 JSON 反序列化
///
/// 解析失败返回 `FromSqlConversionFailure`，由调用方统一映射为仓储错误
pub fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 读取 TEXT 列并用给定解析函数转为枚举
pub fn enum_column<T>(
    row: &Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("无法识别的枚举值: {}", raw).into(),
        )
    })
}

/// 序列化为 JSON 字符串
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_json_column_reports_bad_payload() {
        let conn = Connection::open_in_memory().unwrap();
        let result: rusqlite::Result<Vec<String>> =
            conn.query_row("SELECT 'not json'", [], |row| json_column(row, 0));
        assert!(matches!(
            result,
            Err(rusqlite::Error::FromSqlConversionFailure(0, Type::Text, _))
        ));
    }

    #[test]
    fn test_json_column_parses_array() {
        let conn = Connection::open_in_memory().unwrap();
        let parsed: Vec<String> = conn
            .query_row("SELECT '[\"a\",\"b\"]'", [], |row| json_column(row, 0))
            .unwrap();
        assert_eq!(parsed, vec!["a", "b"]);
    }
}
