// ==========================================
// 树木导入系统 - 领域类型定义
// ==========================================
// 导入类型 / 导入事件状态 / 导入行状态
// 序列化格式: 与数据库一致（小写类型标签、全大写状态）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 导入类型 (Import Type)
// ==========================================
// 入口处一次性选择字段目录、行校验器与行提交器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportType {
    Species, // 树种
    Tree,    // 树木 + 样地
}

impl ImportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Species => "species",
            ImportType::Tree => "tree",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "species" => Some(ImportType::Species),
            "tree" | "trees" => Some(ImportType::Tree),
            _ => None,
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导入事件状态 (Event Status)
// ==========================================
// 状态只前进: PENDING → LOADING → VERIFYING → FINISHED_VERIFICATION
//            → CREATING → FINISHED_CREATING
// 文件校验失败为该次导入的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,                // 已受理，未开始
    Loading,                // 读取文件中
    FailedFileVerification, // 文件校验失败
    Verifying,              // 行校验中
    FinishedVerification,   // 行校验完成
    Creating,               // 提交中
    FinishedCreating,       // 提交完成
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Loading => "LOADING",
            EventStatus::FailedFileVerification => "FAILED_FILE_VERIFICATION",
            EventStatus::Verifying => "VERIFYING",
            EventStatus::FinishedVerification => "FINISHED_VERIFICATION",
            EventStatus::Creating => "CREATING",
            EventStatus::FinishedCreating => "FINISHED_CREATING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(EventStatus::Pending),
            "LOADING" => Some(EventStatus::Loading),
            "FAILED_FILE_VERIFICATION" => Some(EventStatus::FailedFileVerification),
            "VERIFYING" => Some(EventStatus::Verifying),
            "FINISHED_VERIFICATION" => Some(EventStatus::FinishedVerification),
            "CREATING" => Some(EventStatus::Creating),
            "FINISHED_CREATING" => Some(EventStatus::FinishedCreating),
            _ => None,
        }
    }

    /// 是否为终态（不会再有自动状态推进）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::FailedFileVerification | EventStatus::FinishedCreating
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导入行状态 (Row Status)
// ==========================================
// 只允许 WAITING → VALID / ERROR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    Waiting, // 待校验
    Valid,   // 校验通过
    Error,   // 存在致命错误
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Waiting => "WAITING",
            RowStatus::Valid => "VALID",
            RowStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(RowStatus::Waiting),
            "VALID" => Some(RowStatus::Valid),
            "ERROR" => Some(RowStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 管道阶段 (Phase)
// ==========================================
// 校验阶段: VERIFYING → FINISHED_VERIFICATION，未完成 = WAITING 行
// 提交阶段: CREATING → FINISHED_CREATING，未完成 = 未提交的 VALID 行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Verification,
    Creation,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Verification => "verification",
            Phase::Creation => "creation",
        }
    }

    /// 阶段进行中的事件状态
    pub fn running_status(&self) -> EventStatus {
        match self {
            Phase::Verification => EventStatus::Verifying,
            Phase::Creation => EventStatus::Creating,
        }
    }

    /// 阶段完成后的事件状态
    pub fn finished_status(&self) -> EventStatus {
        match self {
            Phase::Verification => EventStatus::FinishedVerification,
            Phase::Creation => EventStatus::FinishedCreating,
        }
    }

    /// 根据事件状态推断当前阶段（非运行态返回 None）
    pub fn from_running_status(status: EventStatus) -> Option<Self> {
        match status {
            EventStatus::Verifying => Some(Phase::Verification),
            EventStatus::Creating => Some(Phase::Creation),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
