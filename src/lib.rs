// ==========================================
// 树木导入系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 树种 / 树木数据的分块导入管道
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 文件解析 / 校验 / 提交
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{ErrorCode, EventStatus, ImportType, Phase, RowStatus};

// 领域实体
pub use domain::{ImportEvent, ImportRow, Plot, Species, Tree};

// 管道
pub use importer::{ImportError, ImportPipeline, ImportResult};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "树木导入系统";
