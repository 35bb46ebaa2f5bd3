// ==========================================
// 树木导入系统 - 导入阶段（文件 → 导入行）
// ==========================================
// 流程:
// 1. 读取表头，原样保存到 field_order
// 2. 规范化表头，校验均为目录内输入字段
// 3. 流式读取记录，按批次（block_size）写入导入行
// 4. 写入 row_count；0 行视为空文件
// 说明: 整体非事务；失败后的清理由调用方负责
// ==========================================

use crate::domain::{ErrorCode, EventError, ImportEvent, ImportRow, RawRowData};
use crate::importer::error::ImportResult;
use crate::importer::file_parser::{CsvParser, CsvRowStream};
use crate::repository::{ImportEventRepository, ImportRowRepository};
use serde_json::json;
use std::io::Read;
use tracing::{debug, info, warn};

/// 导入阶段结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// 文件通过校验，已创建 row_count 行
    Accepted { row_count: i64 },
    /// 表头或内容不合法（错误已写入事件）
    Rejected,
}

pub struct IngestionStage<'a> {
    events: &'a ImportEventRepository,
    rows: &'a ImportRowRepository,
    block_size: usize,
}

impl<'a> IngestionStage<'a> {
    pub fn new(
        events: &'a ImportEventRepository,
        rows: &'a ImportRowRepository,
        block_size: usize,
    ) -> Self {
        Self {
            events,
            rows,
            block_size: block_size.max(1),
        }
    }

    /// 从读取源创建导入行
    ///
    /// # 返回
    /// - Ok(Accepted/Rejected): 文件层面的校验结论
    /// - Err: 读取 / 解析 / 存储异常（调用方转为 GENERIC_ERROR）
    pub fn create_rows_for_event<R: Read>(
        &self,
        event: &ImportEvent,
        source: R,
    ) -> ImportResult<IngestionOutcome> {
        let stream = CsvParser::from_reader(source)?;
        self.ingest(event, stream)
    }

    /// 从已读取表头的行流创建导入行
    pub fn ingest<R: Read>(
        &self,
        event: &ImportEvent,
        stream: CsvRowStream<R>,
    ) -> ImportResult<IngestionOutcome> {
        self.events.save_field_order(event.id, stream.raw_headers())?;

        let catalog = event.import_type.catalog();
        let unknown = catalog.unknown_fields(stream.field_names());
        if !unknown.is_empty() {
            warn!(event_id = event.id, unknown = ?unknown, "表头包含无法识别的字段");
            self.events.append_error(
                event.id,
                EventError::with_data(ErrorCode::UnrecognizedFieldName, json!(unknown)),
            )?;
            return Ok(IngestionOutcome::Rejected);
        }

        let row_count = self.create_rows(event.id, stream)?;
        self.events.set_row_count(event.id, row_count)?;

        if row_count == 0 {
            warn!(event_id = event.id, "文件没有数据行");
            self.events
                .append_error(event.id, EventError::new(ErrorCode::EmptyFile))?;
            return Ok(IngestionOutcome::Rejected);
        }

        info!(event_id = event.id, row_count, "导入行创建完成");
        Ok(IngestionOutcome::Accepted { row_count })
    }

    /// 按批次写入，返回总行数（idx 连续 0..N）
    fn create_rows<I>(&self, event_id: i64, records: I) -> ImportResult<i64>
    where
        I: Iterator<Item = ImportResult<RawRowData>>,
    {
        let mut batch: Vec<ImportRow> = Vec::with_capacity(self.block_size);
        let mut idx: i64 = 0;

        for record in records {
            batch.push(ImportRow::new(event_id, idx, record?));
            idx += 1;

            if batch.len() == self.block_size {
                self.rows.insert_batch(&batch)?;
                debug!(event_id, rows = idx, "批次写入");
                batch.clear();
            }
        }

        // 末尾不足一批
        if !batch.is_empty() {
            self.rows.insert_batch(&batch)?;
        }

        Ok(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_connection;
    use crate::domain::ImportType;
    use std::sync::{Arc, Mutex};

    fn setup() -> (ImportEventRepository, ImportRowRepository, ImportEvent) {
        let conn = Arc::new(Mutex::new(open_in_memory_connection().unwrap()));
        let events = ImportEventRepository::new(conn.clone());
        let rows = ImportRowRepository::new(conn);
        let mut event = ImportEvent::new(ImportType::Tree);
        event.id = events.insert(&event).unwrap();
        (events, rows, event)
    }

    #[test]
    fn test_rows_created_in_batches_with_contiguous_idx() {
        let (events, rows, event) = setup();
        let mut csv = String::from("Point X,Point Y\n");
        for i in 0..7 {
            csv.push_str(&format!("{},{}\n", i, i));
        }

        let stage = IngestionStage::new(&events, &rows, 3);
        let outcome = stage.create_rows_for_event(&event, csv.as_bytes()).unwrap();
        assert_eq!(outcome, IngestionOutcome::Accepted { row_count: 7 });

        let stored = rows.find_block(event.id, 0, 100).unwrap();
        assert_eq!(stored.iter().map(|r| r.idx).collect::<Vec<_>>(), (0..7).collect::<Vec<_>>());
        assert_eq!(events.get(event.id).unwrap().row_count, 7);
    }

    #[test]
    fn test_unknown_header_creates_no_rows() {
        let (events, rows, event) = setup();
        let csv = "point x,point y,Favorite Color\n1,2,red\n";

        let stage = IngestionStage::new(&events, &rows, 250);
        let outcome = stage.create_rows_for_event(&event, csv.as_bytes()).unwrap();
        assert_eq!(outcome, IngestionOutcome::Rejected);
        assert_eq!(rows.count_by_event(event.id).unwrap(), 0);

        let stored = events.get(event.id).unwrap();
        assert_eq!(stored.errors.len(), 1);
        assert_eq!(stored.errors[0].code, ErrorCode::UnrecognizedFieldName);
        assert_eq!(stored.errors[0].data, Some(json!(["favorite color"])));
        assert_eq!(stored.field_order, vec!["point x", "point y", "Favorite Color"]);
    }

    #[test]
    fn test_header_only_is_empty_file() {
        let (events, rows, event) = setup();
        let stage = IngestionStage::new(&events, &rows, 250);
        let outcome = stage
            .create_rows_for_event(&event, "point x,point y\n".as_bytes())
            .unwrap();
        assert_eq!(outcome, IngestionOutcome::Rejected);
        assert_eq!(events.get(event.id).unwrap().errors[0].code, ErrorCode::EmptyFile);
    }
}
