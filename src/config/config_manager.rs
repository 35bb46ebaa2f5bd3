// ==========================================
// 树木导入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::{
    ImportConfigReader, DEFAULT_BLOCK_SIZE, DEFAULT_DATE_FORMAT, DEFAULT_MAX_RETRIES,
    DEFAULT_WORKER_COUNT,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::format::{Item, StrftimeItems};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 读取正整数配置，非法值回退默认值
    fn get_positive_or_default<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
    {
        let raw = match self.get_global_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };
        match raw.trim().parse::<T>() {
            Ok(v) if v > T::default() => Ok(v),
            _ => {
                warn!(key = key, value = %raw, default = %default, "配置值非法，使用默认值");
                Ok(default)
            }
        }
    }

    /// 获取所有 global 配置的快照（JSON 格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let config_map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(serde_json::to_string(&config_map)?)
    }
}

impl ImportConfigReader for ConfigManager {
    fn get_block_size(&self) -> RepositoryResult<usize> {
        self.get_positive_or_default(config_keys::BLOCK_SIZE, DEFAULT_BLOCK_SIZE)
    }

    fn get_date_format(&self) -> RepositoryResult<String> {
        let value = self.get_config_or_default(config_keys::DATE_FORMAT, DEFAULT_DATE_FORMAT)?;

        let usable = !value.trim().is_empty()
            && StrftimeItems::new(&value).all(|item| !matches!(item, Item::Error));
        if !usable {
            warn!(value = %value, "日期格式配置不可用，使用默认值");
            return Ok(DEFAULT_DATE_FORMAT.to_string());
        }
        Ok(value)
    }

    fn get_worker_count(&self) -> RepositoryResult<usize> {
        self.get_positive_or_default(config_keys::WORKER_COUNT, DEFAULT_WORKER_COUNT)
    }

    fn get_max_retries(&self) -> RepositoryResult<u32> {
        let raw = match self.get_global_config_value(config_keys::MAX_RETRIES)? {
            Some(v) => v,
            None => return Ok(DEFAULT_MAX_RETRIES),
        };
        // 0 合法（不重试）
        match raw.trim().parse::<u32>() {
            Ok(v) => Ok(v),
            Err(_) => {
                warn!(
                    key = config_keys::MAX_RETRIES,
                    value = %raw,
                    default = DEFAULT_MAX_RETRIES,
                    "配置值非法，使用默认值"
                );
                Ok(DEFAULT_MAX_RETRIES)
            }
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 调度
    pub const BLOCK_SIZE: &str = "import_block_size";
    pub const WORKER_COUNT: &str = "import_worker_count";
    pub const MAX_RETRIES: &str = "import_max_retries";

    // 字段解析
    pub const DATE_FORMAT: &str = "import_date_format";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::db::open_in_memory_connection;

    fn setup_manager() -> ConfigManager {
        let conn = Arc::new(Mutex::new(open_in_memory_connection().unwrap()));
        ConfigManager::from_connection(conn).unwrap()
    }

    #[test]
    fn test_defaults_when_empty() {
        let manager = setup_manager();
        assert_eq!(manager.load_import_config().unwrap(), ImportConfig::default());
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let manager = setup_manager();
        manager.set_global_config_value(config_keys::BLOCK_SIZE, "100").unwrap();
        manager.set_global_config_value(config_keys::WORKER_COUNT, "0").unwrap();
        manager.set_global_config_value(config_keys::MAX_RETRIES, "0").unwrap();
        manager.set_global_config_value(config_keys::DATE_FORMAT, "%d/%m/%Y").unwrap();

        let config = manager.load_import_config().unwrap();
        assert_eq!(config.block_size, 100);
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT, "0 不是合法并发数");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.date_format, "%d/%m/%Y");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_invalid_max_retries_warns_and_falls_back() {
        let manager = setup_manager();
        manager.set_global_config_value(config_keys::MAX_RETRIES, "abc").unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let retries = tracing::subscriber::with_default(subscriber, || {
            manager.get_max_retries().unwrap()
        });

        assert_eq!(retries, DEFAULT_MAX_RETRIES);
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"), "非法配置应输出告警: {}", output);
        assert!(output.contains(config_keys::MAX_RETRIES));
        assert!(output.contains("abc"));

        // 负数同样回退
        manager.set_global_config_value(config_keys::MAX_RETRIES, "-1").unwrap();
        assert_eq!(manager.get_max_retries().unwrap(), DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_snapshot_is_sorted_json() {
        let manager = setup_manager();
        manager.set_global_config_value("b", "2").unwrap();
        manager.set_global_config_value("a", "1").unwrap();
        assert_eq!(manager.get_config_snapshot().unwrap(), r#"{"a":"1","b":"2"}"#);
    }
}
