// ==========================================
// 树木导入系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::repository::error::RepositoryResult;

/// 默认分块大小（每个调度单元处理的行数，同时是导入批次大小）
pub const DEFAULT_BLOCK_SIZE: usize = 250;
/// 默认日期格式
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
/// 默认工作线程数
pub const DEFAULT_WORKER_COUNT: usize = 4;
/// 默认单元重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ==========================================
// ImportConfig - 导入配置快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub block_size: usize,
    pub date_format: String,
    pub worker_count: usize,
    pub max_retries: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait ImportConfigReader: Send + Sync {
    /// 分块大小
    ///
    /// # 默认值
    /// - 250
    fn get_block_size(&self) -> RepositoryResult<usize>;

    /// 日期字段的解析格式（chrono 格式串）
    ///
    /// # 默认值
    /// - %Y-%m-%d
    fn get_date_format(&self) -> RepositoryResult<String>;

    /// 工作池并发数
    ///
    /// # 默认值
    /// - 4
    fn get_worker_count(&self) -> RepositoryResult<usize>;

    /// 单元失败后的最大重试次数
    ///
    /// # 默认值
    /// - 3
    fn get_max_retries(&self) -> RepositoryResult<u32>;

    /// 读取完整配置快照
    fn load_import_config(&self) -> RepositoryResult<ImportConfig> {
        Ok(ImportConfig {
            block_size: self.get_block_size()?,
            date_format: self.get_date_format()?,
            worker_count: self.get_worker_count()?,
            max_retries: self.get_max_retries()?,
        })
    }
}
