// ==========================================
// 树木导入系统 - 导入行 Repository
// ==========================================
// 职责: import_row 表 CRUD
// 说明:
// - 批量插入一个批次一个事务
// - 分块读取按 idx 半开区间 [start, start+len)，升序
// - *_tx 方法供提交分块在同一事务内调用
// ==========================================

use crate::domain::{ImportRow, Phase, RowError, RowStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::json_utils::{enum_column, json_column, to_json};
use rusqlite::{params, Connection, Row};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const ROW_COLUMNS: &str = "id, event_id, idx, data, cleaned, errors, status, target_id";

/// 各状态行数统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RowStatusCounts {
    pub waiting: i64,
    pub valid: i64,
    pub error: i64,
}

impl RowStatusCounts {
    pub fn total(&self) -> i64 {
        self.waiting + self.valid + self.error
    }
}

pub struct ImportRowRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ImportRowRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量插入导入行（单事务）
    ///
    /// # 返回
    /// 插入行数
    pub fn insert_batch(&self, rows: &[ImportRow]) -> RepositoryResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let count = {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO import_row (event_id, idx, data, cleaned, errors, status, target_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;

            let mut count = 0;
            for row in rows {
                stmt.execute(params![
                    row.event_id,
                    row.idx,
                    to_json(&row.data)?,
                    to_json(&row.cleaned)?,
                    to_json(&row.errors)?,
                    row.status.as_str(),
                    row.target_id,
                ])?;
                count += 1;
            }
            count
        };

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(count)
    }

    /// 读取一个分块的行（idx ∈ [start, start+len)，按 idx 升序）
    pub fn find_block(&self, event_id: i64, start: i64, len: i64) -> RepositoryResult<Vec<ImportRow>> {
        let conn = self.get_conn()?;
        Self::find_block_tx(&conn, event_id, start, len)
    }

    /// 事务内读取分块（`Transaction` 经 Deref 也可传入）
    pub fn find_block_tx(
        conn: &Connection,
        event_id: i64,
        start: i64,
        len: i64,
    ) -> RepositoryResult<Vec<ImportRow>> {
        let sql = format!(
            "SELECT {} FROM import_row WHERE event_id = ?1 AND idx >= ?2 AND idx < ?3 ORDER BY idx ASC",
            ROW_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![event_id, start, start + len], map_import_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 写入校验结果（cleaned / errors / status），单行独立写入
    ///
    /// 已提交的行（target_id 非空）不会被覆盖
    pub fn save_validation(&self, row: &ImportRow) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE import_row
            SET cleaned = ?1, errors = ?2, status = ?3
            WHERE id = ?4 AND target_id IS NULL
            "#,
            params![
                to_json(&row.cleaned)?,
                to_json(&row.errors)?,
                row.status.as_str(),
                row.id,
            ],
        )?;
        Ok(affected > 0)
    }

    /// 事务内标记行已提交
    pub fn mark_committed_tx(conn: &Connection, row_id: i64, target_id: i64) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE import_row SET target_id = ?1 WHERE id = ?2",
            params![target_id, row_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ImportRow".to_string(),
                id: row_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn count_by_status(&self, event_id: i64, status: RowStatus) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM import_row WHERE event_id = ?1 AND status = ?2",
            params![event_id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 一次查询取回全部状态计数
    pub fn status_counts(&self, event_id: i64) -> RepositoryResult<RowStatusCounts> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM import_row WHERE event_id = ?1 GROUP BY status",
        )?;
        let mut counts = RowStatusCounts::default();
        let pairs = stmt
            .query_map(params![event_id], |row| {
                Ok((enum_column(row, 0, RowStatus::parse)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (status, count) in pairs {
            match status {
                RowStatus::Waiting => counts.waiting = count,
                RowStatus::Valid => counts.valid = count,
                RowStatus::Error => counts.error = count,
            }
        }
        Ok(counts)
    }

    /// 待提交行数: VALID 且 target_id 为空
    pub fn count_pending_commit(&self, event_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM import_row WHERE event_id = ?1 AND status = 'VALID' AND target_id IS NULL",
            params![event_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_committed(&self, event_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM import_row WHERE event_id = ?1 AND target_id IS NOT NULL",
            params![event_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 按阶段统计未完成行数（屏障使用）
    pub fn count_outstanding(&self, event_id: i64, phase: Phase) -> RepositoryResult<i64> {
        match phase {
            Phase::Verification => self.count_by_status(event_id, RowStatus::Waiting),
            Phase::Creation => self.count_pending_commit(event_id),
        }
    }

    /// 仍有未完成行的分块起点（升序去重）
    pub fn outstanding_block_starts(
        &self,
        event_id: i64,
        phase: Phase,
        block_size: i64,
    ) -> RepositoryResult<Vec<i64>> {
        if block_size <= 0 {
            return Err(RepositoryError::FieldValueError {
                field: "block_size".to_string(),
                message: format!("分块大小必须为正数: {}", block_size),
            });
        }

        let predicate = match phase {
            Phase::Verification => "status = 'WAITING'",
            Phase::Creation => "status = 'VALID' AND target_id IS NULL",
        };
        let sql = format!(
            "SELECT idx FROM import_row WHERE event_id = ?1 AND {} ORDER BY idx ASC",
            predicate
        );

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let indices = stmt
            .query_map(params![event_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let starts: BTreeSet<i64> = indices
            .into_iter()
            .map(|idx| idx - idx % block_size)
            .collect();
        Ok(starts.into_iter().collect())
    }

    /// 错误报告: ERROR 行的 (idx, errors)，按 idx 升序
    pub fn list_error_rows(&self, event_id: i64) -> RepositoryResult<Vec<(i64, Vec<RowError>)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT idx, errors FROM import_row WHERE event_id = ?1 AND status = 'ERROR' ORDER BY idx ASC",
        )?;
        let rows = stmt
            .query_map(params![event_id], |row| Ok((row.get(0)?, json_column(row, 1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_by_event(&self, event_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM import_row WHERE event_id = ?1",
            params![event_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 删除事件下全部导入行
    pub fn delete_by_event(&self, event_id: i64) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM import_row WHERE event_id = ?1", params![event_id])?;
        Ok(affected)
    }
}

fn map_import_row(row: &Row) -> rusqlite::Result<ImportRow> {
    Ok(ImportRow {
        id: row.get(0)?,
        event_id: row.get(1)?,
        idx: row.get(2)?,
        data: json_column(row, 3)?,
        cleaned: json_column(row, 4)?,
        errors: json_column(row, 5)?,
        status: enum_column(row, 6, RowStatus::parse)?,
        target_id: row.get(7)?,
    })
}
