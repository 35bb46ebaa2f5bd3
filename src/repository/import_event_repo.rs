// ==========================================
// 树木导入系统 - 导入事件 Repository
// ==========================================
// 职责: import_event 表 CRUD
// 红线: Repository 不含业务规则，只做数据 CRUD
// 说明: 状态推进使用条件更新（WHERE status = from），多个分块并发推进幂等
// ==========================================

use crate::domain::{EventError, EventStatus, ImportEvent, ImportType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::json_utils::{enum_column, json_column, to_json};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

pub struct ImportEventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ImportEventRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入事件，返回自增 ID
    pub fn insert(&self, event: &ImportEvent) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_event (
                import_type, status, field_order, row_count, errors, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.import_type.as_str(),
                event.status.as_str(),
                to_json(&event.field_order)?,
                event.row_count,
                to_json(&event.errors)?,
                event.created_at.to_rfc3339(),
                event.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_by_id(&self, event_id: i64) -> RepositoryResult<Option<ImportEvent>> {
        let conn = self.get_conn()?;
        conn.query_row(
            r#"
            SELECT id, import_type, status, field_order, row_count, errors, created_at, updated_at
            FROM import_event
            WHERE id = ?1
            "#,
            params![event_id],
            map_event_row,
        )
        .optional()
        .map_err(|e| e.into())
    }

    /// 查询事件，不存在时返回 NotFound
    pub fn get(&self, event_id: i64) -> RepositoryResult<ImportEvent> {
        self.find_by_id(event_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ImportEvent".to_string(),
                id: event_id.to_string(),
            })
    }

    /// 无条件设置状态（仅导入阶段使用）
    pub fn set_status(&self, event_id: i64, status: EventStatus) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE import_event SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), event_id],
        )?;
        ensure_found(affected, event_id)
    }

    /// 条件状态推进: 仅当当前状态为 `from` 时写入 `to`
    ///
    /// # 返回
    /// - Ok(true): 本次调用完成了推进
    /// - Ok(false): 状态已不是 `from`（其他分块已推进，或尚未到达）
    pub fn transition_status(
        &self,
        event_id: i64,
        from: EventStatus,
        to: EventStatus,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE import_event SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![to.as_str(), Utc::now().to_rfc3339(), event_id, from.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// 保存原始表头顺序
    pub fn save_field_order(&self, event_id: i64, field_order: &[String]) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE import_event SET field_order = ?1, updated_at = ?2 WHERE id = ?3",
            params![to_json(field_order)?, Utc::now().to_rfc3339(), event_id],
        )?;
        ensure_found(affected, event_id)
    }

    /// 设置行数（导入阶段一次性写入）
    pub fn set_row_count(&self, event_id: i64, row_count: i64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE import_event SET row_count = ?1, updated_at = ?2 WHERE id = ?3",
            params![row_count, Utc::now().to_rfc3339(), event_id],
        )?;
        ensure_found(affected, event_id)
    }

    /// 追加事件级错误（读-改-写，在同一把锁内完成）
    pub fn append_error(&self, event_id: i64, error: EventError) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut errors: Vec<EventError> = tx
            .query_row(
                "SELECT errors FROM import_event WHERE id = ?1",
                params![event_id],
                |row| json_column(row, 0),
            )
            .optional()?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ImportEvent".to_string(),
                id: event_id.to_string(),
            })?;
        errors.push(error);

        tx.execute(
            "UPDATE import_event SET errors = ?1, updated_at = ?2 WHERE id = ?3",
            params![to_json(&errors)?, Utc::now().to_rfc3339(), event_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// 列出停留在指定状态的事件（卡滞巡检使用）
    pub fn list_by_status(&self, status: EventStatus) -> RepositoryResult<Vec<ImportEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, import_type, status, field_order, row_count, errors, created_at, updated_at
            FROM import_event
            WHERE status = ?1
            ORDER BY id ASC
            "#,
        )?;
        let events = stmt
            .query_map(params![status.as_str()], map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

fn ensure_found(affected: usize, event_id: i64) -> RepositoryResult<()> {
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "ImportEvent".to_string(),
            id: event_id.to_string(),
        });
    }
    Ok(())
}

fn parse_timestamp(raw: &str, col_idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col_idx, Type::Text, Box::new(e)))
}

fn map_event_row(row: &Row) -> rusqlite::Result<ImportEvent> {
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(ImportEvent {
        id: row.get(0)?,
        import_type: enum_column(row, 1, ImportType::parse)?,
        status: enum_column(row, 2, EventStatus::parse)?,
        field_order: json_column(row, 3)?,
        row_count: row.get(4)?,
        errors: json_column(row, 5)?,
        created_at: parse_timestamp(&created_at, 6)?,
        updated_at: parse_timestamp(&updated_at, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_connection;
    use crate::domain::ErrorCode;
    use serde_json::json;

    fn setup_repo() -> ImportEventRepository {
        let conn = open_in_memory_connection().unwrap();
        ImportEventRepository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_insert_and_find() {
        let repo = setup_repo();
        let id = repo.insert(&ImportEvent::new(ImportType::Tree)).unwrap();

        let event = repo.get(id).unwrap();
        assert_eq!(event.import_type, ImportType::Tree);
        assert_eq!(event.status, EventStatus::Pending);
        assert!(event.field_order.is_empty());
        assert!(repo.find_by_id(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_transition_is_conditional() {
        let repo = setup_repo();
        let id = repo.insert(&ImportEvent::new(ImportType::Species)).unwrap();
        repo.set_status(id, EventStatus::Verifying).unwrap();

        assert!(repo
            .transition_status(id, EventStatus::Verifying, EventStatus::FinishedVerification)
            .unwrap());
        // 第二次推进为空操作
        assert!(!repo
            .transition_status(id, EventStatus::Verifying, EventStatus::FinishedVerification)
            .unwrap());
        assert_eq!(repo.get(id).unwrap().status, EventStatus::FinishedVerification);
    }

    #[test]
    fn test_append_error_keeps_order() {
        let repo = setup_repo();
        let id = repo.insert(&ImportEvent::new(ImportType::Tree)).unwrap();
        repo.append_error(id, EventError::new(ErrorCode::EmptyFile)).unwrap();
        repo.append_error(id, EventError::with_data(ErrorCode::GenericError, json!(["x"])))
            .unwrap();

        let errors = repo.get(id).unwrap().errors;
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code, ErrorCode::EmptyFile);
        assert_eq!(errors[1].code, ErrorCode::GenericError);
    }

    #[test]
    fn test_field_order_roundtrip_verbatim() {
        let repo = setup_repo();
        let id = repo.insert(&ImportEvent::new(ImportType::Tree)).unwrap();
        let headers = vec!["Point X ".to_string(), " point y".to_string()];
        repo.save_field_order(id, &headers).unwrap();
        assert_eq!(repo.get(id).unwrap().field_order, headers);
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let repo = setup_repo();
        let id = repo.insert(&ImportEvent::new(ImportType::Tree)).unwrap();
        repo.get_conn()
            .unwrap()
            .execute(
                "UPDATE import_event SET created_at = 'garbage' WHERE id = ?1",
                params![id],
            )
            .unwrap();

        assert!(repo.find_by_id(id).is_err(), "损坏的时间戳不应被替换为当前时间");
        assert!(repo.list_by_status(EventStatus::Pending).is_err());
    }

    #[test]
    fn test_list_by_status() {
        let repo = setup_repo();
        let first = repo.insert(&ImportEvent::new(ImportType::Tree)).unwrap();
        let second = repo.insert(&ImportEvent::new(ImportType::Species)).unwrap();
        repo.insert(&ImportEvent::new(ImportType::Tree)).unwrap();
        repo.set_status(first, EventStatus::Creating).unwrap();
        repo.set_status(second, EventStatus::Creating).unwrap();

        let ids: Vec<i64> = repo
            .list_by_status(EventStatus::Creating)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_update_missing_event_is_not_found() {
        let repo = setup_repo();
        let result = repo.set_row_count(42, 3);
        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
    }
}
