// ==========================================
// 树木导入系统 - 完成屏障
// ==========================================
// 职责: 分块处理完成后统计未完成行，为 0 时推进事件状态
// 说明:
// - 无专用计数器，每次重新查询行状态（轮询式汇合）
// - 多个分块可能同时看到 0，状态推进使用条件更新，只生效一次
// - 分块在写入行状态前崩溃会导致屏障永不触发，需外部 reconcile
// ==========================================

use crate::domain::Phase;
use crate::importer::error::ImportResult;
use crate::repository::{ImportEventRepository, ImportRowRepository};
use tracing::{debug, info};

/// 屏障检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// 仍有未完成行
    Outstanding(i64),
    /// 本次调用推进了事件状态
    Advanced,
    /// 未完成行为 0，但状态已被其他分块推进（或不在运行态）
    AlreadyAdvanced,
}

pub struct CompletionBarrier<'a> {
    events: &'a ImportEventRepository,
    rows: &'a ImportRowRepository,
}

impl<'a> CompletionBarrier<'a> {
    pub fn new(events: &'a ImportEventRepository, rows: &'a ImportRowRepository) -> Self {
        Self { events, rows }
    }

    pub fn check(&self, event_id: i64, phase: Phase) -> ImportResult<BarrierOutcome> {
        let outstanding = self.rows.count_outstanding(event_id, phase)?;
        if outstanding > 0 {
            debug!(event_id, phase = %phase, outstanding, "屏障未满足");
            return Ok(BarrierOutcome::Outstanding(outstanding));
        }

        let advanced = self.events.transition_status(
            event_id,
            phase.running_status(),
            phase.finished_status(),
        )?;

        if advanced {
            info!(
                event_id,
                phase = %phase,
                status = %phase.finished_status(),
                "导入阶段完成，事件状态已推进"
            );
            Ok(BarrierOutcome::Advanced)
        } else {
            debug!(event_id, phase = %phase, "事件状态已推进，跳过");
            Ok(BarrierOutcome::AlreadyAdvanced)
        }
    }
}
