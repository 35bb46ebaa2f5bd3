// ==========================================
// 树木导入系统 - 导入管道（编排层）
// ==========================================
// 职责:
// - 创建导入事件，执行导入阶段（文件 → 导入行）
// - 调度校验 / 提交分块，执行分块单元
// - 外部触发提交、卡滞事件的补偿重投、结果汇总
// 状态机:
//   PENDING → LOADING → {FAILED_FILE_VERIFICATION | VERIFYING}
//   → FINISHED_VERIFICATION → CREATING → FINISHED_CREATING
// 红线: 文件内容问题只写入事件/行错误列表，不以 Err 返回
// ==========================================

use crate::config::ImportConfig;
use crate::domain::{
    ErrorCode, EventError, EventStatus, ImportEvent, ImportType, Phase, RowError,
};
use crate::importer::barrier::{BarrierOutcome, CompletionBarrier};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::CsvParser;
use crate::importer::ingestion::{IngestionOutcome, IngestionStage};
use crate::importer::scheduler::{schedule_blocks, BlockWorker};
use crate::importer::task_queue::{TaskQueue, UnitExecutor, UnitKind, WorkUnit};
use crate::repository::{
    ImportEventRepository, ImportRowRepository, RowStatusCounts, TargetRepository, UnitOfWork,
};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// 解析导入类型名称（"species" / "tree"）
pub fn parse_import_type(name: &str) -> ImportResult<ImportType> {
    ImportType::parse(name).ok_or_else(|| ImportError::UnknownImportType(name.to_string()))
}

/// 事件汇总
#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub event_id: i64,
    pub import_type: ImportType,
    pub status: EventStatus,
    pub row_count: i64,
    pub rows: RowStatusCounts,
    pub committed: i64,
    pub errors: Vec<EventError>,
}

/// 错误行报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowErrorReport {
    pub idx: i64,
    pub errors: Vec<RowError>,
}

// ==========================================
// ImportPipeline
// ==========================================
pub struct ImportPipeline {
    events: ImportEventRepository,
    rows: ImportRowRepository,
    targets: TargetRepository,
    uow: UnitOfWork,
    config: ImportConfig,
    queue: Arc<dyn TaskQueue>,
}

impl ImportPipeline {
    /// 创建管道（全部仓储共享同一连接）
    pub fn new(conn: Arc<Mutex<Connection>>, config: ImportConfig, queue: Arc<dyn TaskQueue>) -> Self {
        let config = ImportConfig {
            block_size: config.block_size.max(1),
            ..config
        };
        Self {
            events: ImportEventRepository::new(conn.clone()),
            rows: ImportRowRepository::new(conn.clone()),
            targets: TargetRepository::new(conn.clone()),
            uow: UnitOfWork::new(conn),
            config,
            queue,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn events(&self) -> &ImportEventRepository {
        &self.events
    }

    pub fn rows(&self) -> &ImportRowRepository {
        &self.rows
    }

    pub fn targets(&self) -> &TargetRepository {
        &self.targets
    }

    fn block_worker(&self) -> BlockWorker<'_> {
        BlockWorker {
            events: &self.events,
            rows: &self.rows,
            targets: &self.targets,
            uow: &self.uow,
            block_size: self.config.block_size,
            date_format: &self.config.date_format,
        }
    }

    /// 读取事件并校验导入类型
    fn load_event(&self, import_type: ImportType, event_id: i64) -> ImportResult<ImportEvent> {
        let event = self
            .events
            .find_by_id(event_id)?
            .ok_or(ImportError::EventNotFound(event_id))?;

        if event.import_type != import_type {
            return Err(ImportError::ImportTypeMismatch {
                event_id,
                actual: event.import_type.to_string(),
                requested: import_type.to_string(),
            });
        }
        Ok(event)
    }

    // ==========================================
    // 导入阶段
    // ==========================================

    /// 创建 PENDING 事件
    pub fn create_event(&self, import_type: ImportType) -> ImportResult<i64> {
        let event_id = self.events.insert(&ImportEvent::new(import_type))?;
        info!(event_id, import_type = %import_type, "导入事件已创建");
        Ok(event_id)
    }

    /// 对 PENDING 事件执行导入阶段，返回阶段结束时的事件状态
    ///
    /// - 文件合法: VERIFYING，校验分块已入队
    /// - 表头非法 / 空文件 / 读取异常: FAILED_FILE_VERIFICATION，导入行已删除
    pub fn run_import_event_validation<R: Read>(
        &self,
        import_type: ImportType,
        event_id: i64,
        source: R,
    ) -> ImportResult<EventStatus> {
        self.run_ingestion(import_type, event_id, |stage, event| {
            stage.create_rows_for_event(event, source)
        })
    }

    /// 创建事件并对文件执行导入阶段，返回事件 ID
    ///
    /// 文件不存在时不创建事件；表头读取失败记入事件错误列表
    pub fn import_file(&self, import_type: ImportType, path: &Path) -> ImportResult<i64> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        let event_id = self.create_event(import_type)?;
        info!(event_id, file = %path.display(), "开始导入文件");
        self.run_ingestion(import_type, event_id, |stage, event| {
            let stream = CsvParser::open_path(path)?;
            stage.ingest(event, stream)
        })?;
        Ok(event_id)
    }

    fn run_ingestion<F>(&self, import_type: ImportType, event_id: i64, ingest: F) -> ImportResult<EventStatus>
    where
        F: FnOnce(&IngestionStage<'_>, &ImportEvent) -> ImportResult<IngestionOutcome>,
    {
        let event = self.load_event(import_type, event_id)?;
        if event.status != EventStatus::Pending {
            return Err(ImportError::InvalidEventStatus {
                event_id,
                actual: event.status,
                expected: EventStatus::Pending,
            });
        }

        self.events.set_status(event_id, EventStatus::Loading)?;

        let stage = IngestionStage::new(&self.events, &self.rows, self.config.block_size);
        let outcome = match ingest(&stage, &event) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(event_id, error = %e, "导入阶段异常");
                let recorded = self.events.append_error(
                    event_id,
                    EventError::with_data(ErrorCode::GenericError, json!([e.to_string()])),
                );
                // 记录失败仍需落到终态
                if let Err(err) = recorded {
                    warn!(event_id, error = %err, "记录导入异常失败");
                }
                IngestionOutcome::Rejected
            }
        };

        match outcome {
            IngestionOutcome::Accepted { row_count } => {
                self.events.set_status(event_id, EventStatus::Verifying)?;
                schedule_blocks(
                    self.queue.as_ref(),
                    UnitKind::ValidateBlock,
                    import_type,
                    event_id,
                    row_count,
                    self.config.block_size,
                )?;
                Ok(EventStatus::Verifying)
            }
            IngestionOutcome::Rejected => {
                // 清理失败不影响结论
                if let Err(e) = self.rows.delete_by_event(event_id) {
                    warn!(event_id, error = %e, "清理导入行失败");
                }
                self.events
                    .set_status(event_id, EventStatus::FailedFileVerification)?;
                info!(event_id, "文件校验失败");
                Ok(EventStatus::FailedFileVerification)
            }
        }
    }

    // ==========================================
    // 分块单元
    // ==========================================

    /// 校验一个分块
    ///
    /// 仅在 VERIFYING / FINISHED_VERIFICATION 下执行（后者为重投），其他状态忽略
    #[instrument(skip(self, import_type), fields(import_type = %import_type))]
    pub fn validate_block(
        &self,
        import_type: ImportType,
        event_id: i64,
        block_start: i64,
    ) -> ImportResult<BarrierOutcome> {
        let event = self.load_event(import_type, event_id)?;
        match event.status {
            EventStatus::Verifying | EventStatus::FinishedVerification => {
                self.block_worker().validate_block(&event, block_start)
            }
            other => {
                warn!(event_id, block_start, status = %other, "事件不在校验阶段，忽略校验单元");
                Ok(BarrierOutcome::AlreadyAdvanced)
            }
        }
    }

    /// 提交一个分块
    #[instrument(skip(self, import_type), fields(import_type = %import_type))]
    pub fn commit_block(
        &self,
        import_type: ImportType,
        event_id: i64,
        block_start: i64,
    ) -> ImportResult<BarrierOutcome> {
        let event = self.load_event(import_type, event_id)?;
        match event.status {
            EventStatus::Creating => self.block_worker().commit_block(&event, block_start),
            EventStatus::FinishedCreating => {
                debug!(event_id, block_start, "事件已提交完成，忽略重投单元");
                Ok(BarrierOutcome::AlreadyAdvanced)
            }
            other => Err(ImportError::InvalidEventStatus {
                event_id,
                actual: other,
                expected: EventStatus::Creating,
            }),
        }
    }

    // ==========================================
    // 外部操作
    // ==========================================

    /// 外部提交请求: FINISHED_VERIFICATION → CREATING，调度提交分块
    ///
    /// 返回入队的分块数；重复请求返回 InvalidEventStatus
    pub fn commit_import_event(&self, import_type: ImportType, event_id: i64) -> ImportResult<usize> {
        let event = self.load_event(import_type, event_id)?;

        let moved = self.events.transition_status(
            event_id,
            EventStatus::FinishedVerification,
            EventStatus::Creating,
        )?;
        if !moved {
            let actual = self.events.get(event_id)?.status;
            warn!(event_id, status = %actual, "事件状态不允许提交");
            return Err(ImportError::InvalidEventStatus {
                event_id,
                actual,
                expected: EventStatus::FinishedVerification,
            });
        }

        info!(event_id, row_count = event.row_count, "开始提交导入事件");
        schedule_blocks(
            self.queue.as_ref(),
            UnitKind::CommitBlock,
            import_type,
            event_id,
            event.row_count,
            self.config.block_size,
        )
    }

    /// 卡滞补偿: 重投仍有未完成行的分块；无未完成行时重新执行屏障
    ///
    /// 返回重投的分块数（事件不在运行态时为 0）
    pub fn reconcile(&self, import_type: ImportType, event_id: i64) -> ImportResult<usize> {
        let event = self.load_event(import_type, event_id)?;
        let Some(phase) = Phase::from_running_status(event.status) else {
            debug!(event_id, status = %event.status, "事件不在运行态，无需补偿");
            return Ok(0);
        };

        let starts =
            self.rows
                .outstanding_block_starts(event_id, phase, self.config.block_size as i64)?;

        if starts.is_empty() {
            let outcome = CompletionBarrier::new(&self.events, &self.rows).check(event_id, phase)?;
            info!(event_id, phase = %phase, outcome = ?outcome, "无未完成分块，已重新执行屏障");
            return Ok(0);
        }

        for &start in &starts {
            let unit = match phase {
                Phase::Verification => WorkUnit::validate(import_type, event_id, start),
                Phase::Creation => WorkUnit::commit(import_type, event_id, start),
            };
            self.queue.enqueue(unit)?;
        }
        warn!(event_id, phase = %phase, blocks = starts.len(), "卡滞分块已重新入队");
        Ok(starts.len())
    }

    /// 巡检停留在 VERIFYING / CREATING 的全部事件，逐个执行卡滞补偿
    ///
    /// 返回重投的分块总数
    pub fn reconcile_stalled(&self) -> ImportResult<usize> {
        let mut requeued = 0;
        for status in [EventStatus::Verifying, EventStatus::Creating] {
            for event in self.events.list_by_status(status)? {
                requeued += self.reconcile(event.import_type, event.id)?;
            }
        }
        info!(requeued, "卡滞事件巡检完成");
        Ok(requeued)
    }

    /// 事件汇总
    pub fn summary(&self, event_id: i64) -> ImportResult<EventSummary> {
        let event = self
            .events
            .find_by_id(event_id)?
            .ok_or(ImportError::EventNotFound(event_id))?;

        Ok(EventSummary {
            event_id,
            import_type: event.import_type,
            status: event.status,
            row_count: event.row_count,
            rows: self.rows.status_counts(event_id)?,
            committed: self.rows.count_committed(event_id)?,
            errors: event.errors,
        })
    }

    /// 错误行报告（按 idx 升序）
    pub fn row_errors(&self, event_id: i64) -> ImportResult<Vec<RowErrorReport>> {
        Ok(self
            .rows
            .list_error_rows(event_id)?
            .into_iter()
            .map(|(idx, errors)| RowErrorReport { idx, errors })
            .collect())
    }
}

impl UnitExecutor for ImportPipeline {
    fn execute(&self, unit: &WorkUnit) -> ImportResult<()> {
        let outcome = match unit.kind {
            UnitKind::ValidateBlock => {
                self.validate_block(unit.import_type, unit.event_id, unit.block_start)?
            }
            UnitKind::CommitBlock => {
                self.commit_block(unit.import_type, unit.event_id, unit.block_start)?
            }
        };
        debug!(
            kind = unit.kind.as_str(),
            event_id = unit.event_id,
            block_start = unit.block_start,
            outcome = ?outcome,
            "单元执行完成"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_connection;
    use crate::domain::RowStatus;
    use crate::importer::task_queue::InlineTaskQueue;

    fn pipeline(block_size: usize) -> (ImportPipeline, Arc<InlineTaskQueue>) {
        let conn = Arc::new(Mutex::new(open_in_memory_connection().unwrap()));
        let queue = Arc::new(InlineTaskQueue::new());
        let config = ImportConfig {
            block_size,
            ..ImportConfig::default()
        };
        (ImportPipeline::new(conn, config, queue.clone()), queue)
    }

    #[test]
    fn test_parse_import_type() {
        assert_eq!(parse_import_type("tree").unwrap(), ImportType::Tree);
        assert!(matches!(
            parse_import_type("shrub"),
            Err(ImportError::UnknownImportType(_))
        ));
    }

    #[test]
    fn test_validation_schedules_blocks_and_finishes() {
        let (pipeline, queue) = pipeline(2);
        let event_id = pipeline.create_event(ImportType::Tree).unwrap();
        let csv = "point x,point y,diameter\n1,2,3\n1,2,-3\n1,2,abc\n";

        let status = pipeline
            .run_import_event_validation(ImportType::Tree, event_id, csv.as_bytes())
            .unwrap();
        assert_eq!(status, EventStatus::Verifying);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.drain(&pipeline).unwrap(), 2);

        let summary = pipeline.summary(event_id).unwrap();
        assert_eq!(summary.status, EventStatus::FinishedVerification);
        assert_eq!(summary.rows.valid, 1);
        assert_eq!(summary.rows.error, 2);

        let report = pipeline.row_errors(event_id).unwrap();
        assert_eq!(report.iter().map(|r| r.idx).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(report[0].errors[0].code, ErrorCode::PositiveError);
        assert_eq!(report[1].errors[0].code, ErrorCode::FloatError);
    }

    #[test]
    fn test_second_ingestion_is_rejected() {
        let (pipeline, _queue) = pipeline(250);
        let event_id = pipeline.create_event(ImportType::Tree).unwrap();
        let csv = "point x,point y\n1,2\n";
        pipeline
            .run_import_event_validation(ImportType::Tree, event_id, csv.as_bytes())
            .unwrap();

        let again = pipeline.run_import_event_validation(ImportType::Tree, event_id, csv.as_bytes());
        assert!(matches!(again, Err(ImportError::InvalidEventStatus { .. })));
    }

    #[test]
    fn test_type_mismatch_and_missing_event() {
        let (pipeline, _queue) = pipeline(250);
        let event_id = pipeline.create_event(ImportType::Species).unwrap();

        assert!(matches!(
            pipeline.validate_block(ImportType::Tree, event_id, 0),
            Err(ImportError::ImportTypeMismatch { .. })
        ));
        assert!(matches!(
            pipeline.validate_block(ImportType::Tree, 999, 0),
            Err(ImportError::EventNotFound(999))
        ));
    }

    #[test]
    fn test_commit_requires_finished_verification() {
        let (pipeline, queue) = pipeline(250);
        let event_id = pipeline.create_event(ImportType::Tree).unwrap();
        pipeline
            .run_import_event_validation(ImportType::Tree, event_id, "point x,point y\n1,2\n".as_bytes())
            .unwrap();

        // 尚在 VERIFYING
        assert!(matches!(
            pipeline.commit_import_event(ImportType::Tree, event_id),
            Err(ImportError::InvalidEventStatus {
                expected: EventStatus::FinishedVerification,
                ..
            })
        ));

        queue.drain(&pipeline).unwrap();
        assert_eq!(pipeline.commit_import_event(ImportType::Tree, event_id).unwrap(), 1);
        // 重复提交请求
        assert!(pipeline.commit_import_event(ImportType::Tree, event_id).is_err());

        queue.drain(&pipeline).unwrap();
        let summary = pipeline.summary(event_id).unwrap();
        assert_eq!(summary.status, EventStatus::FinishedCreating);
        assert_eq!(summary.committed, 1);
    }

    #[test]
    fn test_reconcile_requeues_only_outstanding_blocks() {
        let (pipeline, queue) = pipeline(2);
        let event_id = pipeline.create_event(ImportType::Tree).unwrap();
        let csv = "point x,point y\n1,1\n2,2\n3,3\n4,4\n5,5\n";
        pipeline
            .run_import_event_validation(ImportType::Tree, event_id, csv.as_bytes())
            .unwrap();

        // 模拟只执行了第一个分块，其余单元丢失
        let mut units = queue.take_all().unwrap();
        assert_eq!(units.len(), 3);
        pipeline.execute(&units.remove(0)).unwrap();

        assert_eq!(pipeline.reconcile(ImportType::Tree, event_id).unwrap(), 2);
        let requeued = queue.take_all().unwrap();
        assert_eq!(requeued.iter().map(|u| u.block_start).collect::<Vec<_>>(), vec![2, 4]);

        for unit in &requeued {
            pipeline.execute(unit).unwrap();
        }
        assert_eq!(
            pipeline.summary(event_id).unwrap().status,
            EventStatus::FinishedVerification
        );
        assert_eq!(pipeline.reconcile(ImportType::Tree, event_id).unwrap(), 0);
    }

    #[test]
    fn test_reconcile_stalled_sweeps_running_events() {
        let (pipeline, queue) = pipeline(2);
        let verifying = pipeline.create_event(ImportType::Tree).unwrap();
        pipeline
            .run_import_event_validation(
                ImportType::Tree,
                verifying,
                "point x,point y\n1,1\n2,2\n3,3\n".as_bytes(),
            )
            .unwrap();
        // 校验单元全部丢失
        assert_eq!(queue.take_all().unwrap().len(), 2);

        let creating = pipeline.create_event(ImportType::Species).unwrap();
        pipeline
            .run_import_event_validation(
                ImportType::Species,
                creating,
                "genus,species\nAcer,rubrum\n".as_bytes(),
            )
            .unwrap();
        queue.drain(&pipeline).unwrap();
        pipeline.commit_import_event(ImportType::Species, creating).unwrap();
        // 提交单元丢失
        assert_eq!(queue.take_all().unwrap().len(), 1);

        // 已失败的事件不参与巡检
        let failed = pipeline.create_event(ImportType::Tree).unwrap();
        pipeline
            .run_import_event_validation(ImportType::Tree, failed, "bark\nrough\n".as_bytes())
            .unwrap();

        assert_eq!(pipeline.reconcile_stalled().unwrap(), 3);
        let kinds: Vec<(i64, UnitKind)> = queue
            .take_all()
            .unwrap()
            .iter()
            .map(|u| (u.event_id, u.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (verifying, UnitKind::ValidateBlock),
                (verifying, UnitKind::ValidateBlock),
                (creating, UnitKind::CommitBlock),
            ]
        );
    }

    #[test]
    fn test_append_error_failure_still_fails_file_verification() {
        let conn = Arc::new(Mutex::new(open_in_memory_connection().unwrap()));
        let queue = Arc::new(InlineTaskQueue::new());
        let pipeline = ImportPipeline::new(conn.clone(), ImportConfig::default(), queue);
        conn.lock()
            .unwrap()
            .execute_batch(
                r#"
                CREATE TRIGGER reject_event_errors BEFORE UPDATE OF errors ON import_event
                BEGIN
                    SELECT RAISE(ABORT, 'errors column unavailable');
                END;
                "#,
            )
            .unwrap();

        let event_id = pipeline.create_event(ImportType::Tree).unwrap();
        let status = pipeline
            .run_import_event_validation(ImportType::Tree, event_id, &b"p\xff\xfe,x\n1,2\n"[..])
            .unwrap();

        assert_eq!(status, EventStatus::FailedFileVerification);
        let summary = pipeline.summary(event_id).unwrap();
        assert_eq!(summary.status, EventStatus::FailedFileVerification);
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn test_validate_block_ignored_while_creating() {
        let (pipeline, queue) = pipeline(250);
        let event_id = pipeline.create_event(ImportType::Tree).unwrap();
        pipeline
            .run_import_event_validation(ImportType::Tree, event_id, "point x,point y\n1,2\n".as_bytes())
            .unwrap();
        queue.drain(&pipeline).unwrap();
        pipeline.commit_import_event(ImportType::Tree, event_id).unwrap();

        let outcome = pipeline.validate_block(ImportType::Tree, event_id, 0).unwrap();
        assert_eq!(outcome, BarrierOutcome::AlreadyAdvanced);
        assert_eq!(
            pipeline.rows().count_by_status(event_id, RowStatus::Valid).unwrap(),
            1
        );
    }
}
