// ==========================================
// 树木导入系统 - CSV 文件解析器
// ==========================================
// 职责: 读取表头 + 逐行流式产出规范化行数据
// 说明:
// - 不一次性读入全部行，调用方按批次消费
// - 表头规范化: 去 BOM、trim、小写、连续空白折叠为单空格
// - 值仅做 trim；完全空白的记录跳过
// ==========================================

use crate::domain::RawRowData;
use crate::importer::error::{ImportError, ImportResult};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const UTF8_BOM: char = '\u{feff}';

/// 规范化字段名
pub fn clean_field_name(raw: &str) -> String {
    raw.trim_start_matches(UTF8_BOM)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 按规范化表头构造行数据（多出的列忽略，缺少的列不出现）
pub fn clean_row_data(field_names: &[String], record: &StringRecord) -> RawRowData {
    let mut row = RawRowData::new();
    for (col_idx, value) in record.iter().enumerate() {
        if let Some(name) = field_names.get(col_idx) {
            row.insert(name.clone(), value.trim().to_string());
        }
    }
    row
}

// ==========================================
// CsvParser
// ==========================================
pub struct CsvParser;

impl CsvParser {
    /// 打开 CSV 文件
    pub fn open_path(path: &Path) -> ImportResult<CsvRowStream<File>> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// 从任意读取源构造行流（读取并缓存表头）
    pub fn from_reader<R: Read>(source: R) -> ImportResult<CsvRowStream<R>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(source);

        let raw_headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let field_names = raw_headers.iter().map(|h| clean_field_name(h)).collect();

        Ok(CsvRowStream {
            reader,
            raw_headers,
            field_names,
            record: StringRecord::new(),
        })
    }
}

// ==========================================
// CsvRowStream - 逐行读取
// ==========================================
pub struct CsvRowStream<R: Read> {
    reader: csv::Reader<R>,
    raw_headers: Vec<String>,
    field_names: Vec<String>,
    record: StringRecord,
}

impl<R: Read> CsvRowStream<R> {
    /// 原始表头（逐字保留）
    pub fn raw_headers(&self) -> &[String] {
        &self.raw_headers
    }

    /// 规范化后的字段名
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }
}

impl<R: Read> Iterator for CsvRowStream<R> {
    type Item = ImportResult<RawRowData>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => return None,
                Ok(true) => {
                    let row = clean_row_data(&self.field_names, &self.record);
                    // 跳过完全空白的行
                    if row.values().all(|v| v.is_empty()) {
                        continue;
                    }
                    return Some(Ok(row));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_field_name() {
        assert_eq!(clean_field_name("\u{feff}Point X"), "point x");
        assert_eq!(clean_field_name("  Other   Part\tof Name "), "other part of name");
        assert_eq!(clean_field_name(""), "");
    }

    #[test]
    fn test_stream_keeps_raw_headers_and_skips_blank_rows() {
        let csv = "Point X, Point  Y,Diameter\n1,2,3\n,,\n 4 , 5 ,\n";
        let mut stream = CsvParser::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(stream.raw_headers(), &["Point X", " Point  Y", "Diameter"]);
        assert_eq!(stream.field_names(), &["point x", "point y", "diameter"]);

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.get("point x").map(String::as_str), Some("1"));

        let second = stream.next().unwrap().unwrap();
        assert_eq!(second.get("point y").map(String::as_str), Some("5"));
        assert_eq!(second.get("diameter").map(String::as_str), Some(""));

        assert!(stream.next().is_none());
    }

    #[test]
    fn test_short_and_long_records() {
        let csv = "genus,common name\nAcer\nQuercus,Oak,extra\n";
        let rows: Vec<RawRowData> = CsvParser::from_reader(csv.as_bytes())
            .unwrap()
            .collect::<ImportResult<Vec<_>>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(!rows[0].contains_key("common name"));
        assert_eq!(rows[1].len(), 2, "多出的列应忽略");
    }

    #[test]
    fn test_missing_file() {
        let result = CsvParser::open_path(Path::new("/nonexistent/trees.csv"));
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }
}
