// ==========================================
// 树木导入系统 - 分块调度
// ==========================================
// 职责:
// - 行号区间 [0, N) 按固定大小 B 切分为 ceil(N/B) 个分块
// - 分块单元体: validate_block / commit_block
// 说明:
// - 校验单元非事务，逐行独立写入（幂等覆盖）
// - 提交单元一个分块一个事务，任一行失败整块回滚
// - 单元只触碰自身分块内的行
// ==========================================

use crate::domain::{ImportEvent, ImportType, Phase};
use crate::importer::barrier::{BarrierOutcome, CompletionBarrier};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::row_committer::committer_for;
use crate::importer::row_validator::validator_for;
use crate::importer::task_queue::{TaskQueue, UnitKind, WorkUnit};
use crate::repository::{
    ImportEventRepository, ImportRowRepository, RepositoryError, TargetRepository, UnitOfWork,
};
use std::ops::Range;
use tracing::{debug, info, warn};

/// 分块起点: {0, B, 2B, ...} ∩ [0, N)
pub fn block_starts(row_count: i64, block_size: usize) -> Vec<i64> {
    if row_count <= 0 || block_size == 0 {
        return Vec::new();
    }
    (0..row_count).step_by(block_size).collect()
}

/// 分块覆盖的行号区间（末块可能不足 B）
pub fn block_range(block_start: i64, block_size: usize, row_count: i64) -> Range<i64> {
    let end = block_start.saturating_add(block_size as i64).min(row_count);
    block_start..end.max(block_start)
}

/// 为事件的全部分块入队
pub fn schedule_blocks(
    queue: &dyn TaskQueue,
    kind: UnitKind,
    import_type: ImportType,
    event_id: i64,
    row_count: i64,
    block_size: usize,
) -> ImportResult<usize> {
    let starts = block_starts(row_count, block_size);
    for &start in &starts {
        let unit = match kind {
            UnitKind::ValidateBlock => WorkUnit::validate(import_type, event_id, start),
            UnitKind::CommitBlock => WorkUnit::commit(import_type, event_id, start),
        };
        queue.enqueue(unit)?;
    }
    info!(
        event_id,
        kind = kind.as_str(),
        blocks = starts.len(),
        row_count,
        "分块已入队"
    );
    Ok(starts.len())
}

// ==========================================
// BlockWorker - 分块单元体
// ==========================================
pub struct BlockWorker<'a> {
    pub events: &'a ImportEventRepository,
    pub rows: &'a ImportRowRepository,
    pub targets: &'a TargetRepository,
    pub uow: &'a UnitOfWork,
    pub block_size: usize,
    pub date_format: &'a str,
}

impl<'a> BlockWorker<'a> {
    fn barrier(&self) -> CompletionBarrier<'_> {
        CompletionBarrier::new(self.events, self.rows)
    }

    /// 校验一个分块
    ///
    /// 已提交的行（target_id 非空）保持不变
    pub fn validate_block(&self, event: &ImportEvent, block_start: i64) -> ImportResult<BarrierOutcome> {
        let validator = validator_for(event.import_type);
        let rows = self
            .rows
            .find_block(event.id, block_start, self.block_size as i64)?;

        let mut valid = 0usize;
        let mut invalid = 0usize;
        let mut skipped = 0usize;

        for mut row in rows {
            if row.is_committed() {
                skipped += 1;
                continue;
            }

            let result = validator.validate(&row.data, self.targets, self.date_format)?;
            row.status = result.status();
            row.cleaned = result.cleaned;
            row.errors = result.errors;

            if row.has_fatal_errors() {
                invalid += 1;
            } else {
                valid += 1;
            }
            self.rows.save_validation(&row)?;
        }

        debug!(
            event_id = event.id,
            block_start, valid, invalid, skipped, "分块校验完成"
        );

        self.barrier().check(event.id, Phase::Verification)
    }

    /// 提交一个分块（单事务）
    pub fn commit_block(&self, event: &ImportEvent, block_start: i64) -> ImportResult<BarrierOutcome> {
        let committer = committer_for(event.import_type);
        let event_id = event.id;
        let block_len = self.block_size as i64;

        let committed = self.uow.run(|tx| {
            let rows = ImportRowRepository::find_block_tx(tx, event_id, block_start, block_len)?;
            let mut committed = 0usize;
            for row in rows.iter().filter(|r| r.is_pending_commit()) {
                let target_id = committer.commit_row(tx, row).map_err(|e| match e {
                    RepositoryError::FieldValueError { field, message } => {
                        RepositoryError::FieldValueError {
                            field,
                            message: format!("{} (idx={})", message, row.idx),
                        }
                    }
                    other => other,
                })?;
                ImportRowRepository::mark_committed_tx(tx, row.id, target_id)?;
                committed += 1;
            }
            Ok(committed)
        });

        let committed = match committed {
            Ok(n) => n,
            Err(e) => {
                warn!(event_id, block_start, error = %e, "分块提交失败，整块回滚");
                return Err(ImportError::Repository(e));
            }
        };

        debug!(event_id, block_start, committed, "分块提交完成");

        self.barrier().check(event_id, Phase::Creation)
    }
}
