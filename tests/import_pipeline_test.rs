// ==========================================
// 导入管道集成测试
// ==========================================
// 测试目标:
// - 文件层校验（未知表头 / 空文件 / 读取异常）
// - 行级校验结果（类型错误、树种匹配、警告）
// - 分块校验幂等
// - 提交阶段创建目标记录
// ==========================================


use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use tree_import::config::{config_keys, ConfigManager, ImportConfigReader};
use tree_import::domain::{ErrorCode, EventStatus, FieldValue, ImportType, RowStatus};
use tree_import::importer::{BarrierOutcome, ImportError};
use tree_import::logging;

#[test]
fn test_unknown_header_fails_file_verification() {
    logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 250);

    let csv = "Point X,Point Y,Leaf Color,Bark\n1,2,green,rough\n3,4,red,smooth\n";
    let event_id = test_helpers::ingest(&pipeline, ImportType::Tree, csv);

    let summary = pipeline.summary(event_id).unwrap();
    assert_eq!(summary.status, EventStatus::FailedFileVerification);
    assert_eq!(summary.errors.len(), 1, "应只有一条事件错误");
    assert_eq!(summary.errors[0].code, ErrorCode::UnrecognizedFieldName);
    assert_eq!(summary.errors[0].data, Some(json!(["leaf color", "bark"])));
    assert_eq!(summary.rows.total(), 0, "不应创建导入行");
    assert!(queue.is_empty(), "不应调度校验分块");
}

#[test]
fn test_header_only_file_is_empty_file() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 250);

    let event_id = test_helpers::ingest(&pipeline, ImportType::Tree, "Point X,Point Y\n\n , \n");

    let summary = pipeline.summary(event_id).unwrap();
    assert_eq!(summary.status, EventStatus::FailedFileVerification);
    assert_eq!(summary.row_count, 0);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].code, ErrorCode::EmptyFile);
    assert!(queue.is_empty());
}

#[test]
fn test_unreadable_content_becomes_generic_error_and_rows_removed() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 2);

    // 前两行成批写入后，第三行不是合法 UTF-8
    let mut bytes = b"point x,point y\n1,1\n2,2\n".to_vec();
    bytes.extend_from_slice(&[0xff, 0xfe, b',', b'3', b'\n']);

    let event_id = pipeline.create_event(ImportType::Tree).unwrap();
    let status = pipeline
        .run_import_event_validation(ImportType::Tree, event_id, bytes.as_slice())
        .expect("导入阶段异常不应以 Err 返回");
    assert_eq!(status, EventStatus::FailedFileVerification);

    let summary = pipeline.summary(event_id).unwrap();
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].code, ErrorCode::GenericError);
    assert!(summary.errors[0].data.as_ref().map(|d| d.is_array()).unwrap_or(false));
    assert_eq!(pipeline.rows().count_by_event(event_id).unwrap(), 0, "失败后导入行应被清理");
    assert!(queue.is_empty());
}

#[test]
fn test_missing_file_is_reported_before_event_creation() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let (pipeline, _queue) = test_helpers::create_inline_pipeline(conn, 250);

    let result = pipeline.import_file(ImportType::Tree, std::path::Path::new("/nonexistent/trees.csv"));
    assert!(matches!(result, Err(ImportError::FileNotFound(_))));
}

#[test]
fn test_import_file_with_unreadable_header_keeps_event() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 250);

    let mut csv_file = NamedTempFile::new().expect("Failed to create csv file");
    csv_file
        .write_all(b"p\xff\xfe,x\n1,2\n")
        .expect("Failed to write csv file");

    let event_id = pipeline
        .import_file(ImportType::Tree, csv_file.path())
        .expect("表头读取失败应记录在事件上");

    let summary = pipeline.summary(event_id).unwrap();
    assert_eq!(summary.status, EventStatus::FailedFileVerification);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].code, ErrorCode::GenericError);
    assert_eq!(
        pipeline
            .events()
            .list_by_status(EventStatus::FailedFileVerification)
            .unwrap()
            .len(),
        1
    );
    assert!(queue.is_empty());
}

#[test]
fn test_diameter_values_are_type_checked() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 250);

    let csv = "point x,point y,diameter\n1,1,12.5\n2,2,-3\n3,3,abc\n";
    let event_id = test_helpers::ingest(&pipeline, ImportType::Tree, csv);
    assert_eq!(queue.drain(&pipeline).unwrap(), 1);

    let rows = pipeline.rows().find_block(event_id, 0, 250).unwrap();
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].status, RowStatus::Valid);
    assert_eq!(rows[0].cleaned.get("diameter"), Some(&FieldValue::Float(12.5)));

    assert_eq!(rows[1].status, RowStatus::Error);
    assert_eq!(rows[1].errors[0].code, ErrorCode::PositiveError);
    assert_eq!(rows[1].errors[0].fields, vec!["diameter"]);

    assert_eq!(rows[2].status, RowStatus::Error);
    assert_eq!(rows[2].errors[0].code, ErrorCode::FloatError);
    assert_eq!(rows[2].errors[0].fields, vec!["diameter"]);

    assert_eq!(
        pipeline.summary(event_id).unwrap().status,
        EventStatus::FinishedVerification
    );
}

#[test]
fn test_rows_span_multiple_blocks() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 250);

    let event_id = test_helpers::ingest(&pipeline, ImportType::Tree, &test_helpers::tree_csv(501));
    assert_eq!(queue.len(), 3, "501 行应切分为 3 个分块");

    let units = queue.take_all().unwrap();
    assert_eq!(
        units.iter().map(|u| u.block_start).collect::<Vec<_>>(),
        vec![0, 250, 500]
    );

    // 倒序执行，最后一个分块推进状态
    let outcomes: Vec<BarrierOutcome> = units
        .iter()
        .rev()
        .map(|u| pipeline.validate_block(u.import_type, u.event_id, u.block_start).unwrap())
        .collect();
    assert_eq!(outcomes[0], BarrierOutcome::Outstanding(500));
    assert_eq!(outcomes[1], BarrierOutcome::Outstanding(250));
    assert_eq!(outcomes[2], BarrierOutcome::Advanced);

    let summary = pipeline.summary(event_id).unwrap();
    assert_eq!(summary.row_count, 501);
    assert_eq!(summary.rows.valid, 501);
    assert_eq!(summary.status, EventStatus::FinishedVerification);
}

#[test]
fn test_validate_block_twice_is_idempotent() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    test_helpers::seed_species(&conn, "Acer", "rubrum", Some(50.0));
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 250);

    let csv = "point x,point y,genus,species,diameter\n\
               1,1,Acer,rubrum,10\n\
               2,2,Quercus,alba,10\n\
               3,3,,,x\n";
    let event_id = test_helpers::ingest(&pipeline, ImportType::Tree, csv);
    queue.drain(&pipeline).unwrap();

    let first = pipeline.rows().find_block(event_id, 0, 250).unwrap();
    let outcome = pipeline.validate_block(ImportType::Tree, event_id, 0).unwrap();
    assert_eq!(outcome, BarrierOutcome::AlreadyAdvanced);
    let second = pipeline.rows().find_block(event_id, 0, 250).unwrap();

    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.status, b.status);
        assert_eq!(a.errors, b.errors);
        assert_eq!(a.cleaned, b.cleaned);
    }
    assert_eq!(pipeline.targets().count_plots().unwrap(), 0, "校验不应创建目标记录");
    assert_eq!(pipeline.targets().count_trees().unwrap(), 0);
}

#[test]
fn test_tree_import_end_to_end() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let acer = test_helpers::seed_species(&conn, "Acer", "rubrum", Some(50.0));
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 2);

    let csv = "Point X,Point Y,Genus,Species,Diameter,Date Planted,Tree Present\n\
               10.5,20.5,acer,RUBRUM,60,2019-04-01,\n\
               11.5,21.5,Quercus,alba,10,,\n\
               12.5,22.5,,,,,false\n\
               13.5,23.5,Acer,rubrum,5,04/01/2019,\n";
    let event_id = test_helpers::ingest(&pipeline, ImportType::Tree, csv);
    assert_eq!(queue.drain(&pipeline).unwrap(), 2);

    let rows = pipeline.rows().find_block(event_id, 0, 10).unwrap();

    // 匹配到树种；胸径超出上限只是警告
    assert_eq!(rows[0].status, RowStatus::Valid);
    assert_eq!(
        rows[0].cleaned.get("calc__species_object"),
        Some(&FieldValue::SpeciesRef(acer))
    );
    assert_eq!(rows[0].errors.len(), 1);
    assert_eq!(rows[0].errors[0].code, ErrorCode::SpeciesDbhTooHigh);
    assert!(!rows[0].errors[0].fatal);

    assert_eq!(rows[1].status, RowStatus::Error);
    assert_eq!(rows[1].errors[0].code, ErrorCode::InvalidSpecies);

    assert_eq!(rows[2].status, RowStatus::Valid);

    assert_eq!(rows[3].status, RowStatus::Error);
    assert_eq!(rows[3].errors[0].code, ErrorCode::DateError);

    let report = pipeline.row_errors(event_id).unwrap();
    assert_eq!(report.iter().map(|r| r.idx).collect::<Vec<_>>(), vec![1, 3]);

    // 提交
    assert_eq!(pipeline.commit_import_event(ImportType::Tree, event_id).unwrap(), 2);
    queue.drain(&pipeline).unwrap();

    let summary = pipeline.summary(event_id).unwrap();
    assert_eq!(summary.status, EventStatus::FinishedCreating);
    assert_eq!(summary.committed, 2);

    let targets = pipeline.targets();
    assert_eq!(targets.count_plots().unwrap(), 2);
    assert_eq!(targets.count_trees().unwrap(), 1, "tree present = false 的行不创建树木");

    let rows = pipeline.rows().find_block(event_id, 0, 10).unwrap();
    let plot_id = rows[0].target_id.expect("已提交行应有 target_id");
    let tree = targets.find_tree_by_plot(plot_id).unwrap().expect("应创建树木");
    assert_eq!(tree.species_id, Some(acer));
    assert_eq!(tree.diameter, Some(60.0));
    assert!(rows[1].target_id.is_none(), "ERROR 行不提交");
}

#[test]
fn test_species_import_merges_existing_records() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    let existing = test_helpers::seed_species(&conn, "Acer", "rubrum", None);
    let (pipeline, queue) = test_helpers::create_inline_pipeline(conn, 250);

    let csv = "Genus,Species,Common Name,Max Diameter,Is Native\n\
               Acer,rubrum,Red Maple,120,yes\n\
               Quercus,alba,White Oak,200,no\n\
               ,,Nameless,,\n";
    let event_id = test_helpers::ingest(&pipeline, ImportType::Species, csv);
    queue.drain(&pipeline).unwrap();

    let rows = pipeline.rows().find_block(event_id, 0, 250).unwrap();
    assert_eq!(
        rows[0].cleaned.get("calc__species"),
        Some(&FieldValue::SpeciesMatches(vec![existing]))
    );
    assert_eq!(
        rows[1].cleaned.get("calc__species"),
        Some(&FieldValue::SpeciesMatches(vec![]))
    );
    assert_eq!(rows[2].status, RowStatus::Error);
    assert_eq!(rows[2].errors[0].code, ErrorCode::MissingField);

    pipeline.commit_import_event(ImportType::Species, event_id).unwrap();
    queue.drain(&pipeline).unwrap();

    let targets = pipeline.targets();
    assert_eq!(targets.count_species().unwrap(), 2, "同名树种应合并");
    let merged = targets.find_species(existing).unwrap().expect("既有树种应保留");
    assert_eq!(merged.common_name.as_deref(), Some("Red Maple"));
    assert_eq!(merged.max_diameter, Some(120.0));
    assert_eq!(merged.is_native, Some(true));
    assert_eq!(
        pipeline.summary(event_id).unwrap().status,
        EventStatus::FinishedCreating
    );
}

#[test]
fn test_block_size_from_config_table() {
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let conn = test_helpers::open_shared(&db_path);
    {
        let guard = conn.lock().unwrap();
        test_helpers::insert_test_config(&guard, config_keys::BLOCK_SIZE, "4").unwrap();
    }

    let config = ConfigManager::from_connection(conn.clone())
        .unwrap()
        .load_import_config()
        .unwrap();
    assert_eq!(config.block_size, 4);

    let queue = std::sync::Arc::new(tree_import::importer::InlineTaskQueue::new());
    let pipeline = tree_import::ImportPipeline::new(conn, config, queue.clone());
    test_helpers::ingest(&pipeline, ImportType::Tree, &test_helpers::tree_csv(9));
    assert_eq!(queue.len(), 3);
}
