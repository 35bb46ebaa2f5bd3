// ==========================================
// 树木导入系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod error;
pub mod import_event_repo;
pub mod import_row_repo;
pub mod json_utils;
pub mod target_repo;
pub mod unit_of_work;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use import_event_repo::ImportEventRepository;
pub use import_row_repo::{ImportRowRepository, RowStatusCounts};
pub use target_repo::TargetRepository;
pub use unit_of_work::UnitOfWork;
