// ==========================================
// 树木导入系统 - 命令行入口
// ==========================================
// 用法:
//   tree-import <species|tree> <file.csv> [--commit] [--workers] [--db <path>]
//
// 执行完整管道（导入 → 分块校验 → 可选提交），
// 默认进程内同步排空；--workers 时按配置启动 tokio 工作池
// 结果汇总以 JSON 输出到 stdout，日志输出到 stderr
// ==========================================

use anyhow::{bail, Context};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tree_import::config::{ConfigManager, ImportConfig, ImportConfigReader};
use tree_import::db::{ensure_schema, get_default_db_path, open_sqlite_connection};
use tree_import::domain::{EventStatus, ImportType};
use tree_import::importer::{parse_import_type, ImportPipeline, InlineTaskQueue, PooledImport};
use tree_import::logging;

const USAGE: &str =
    "用法: tree-import <species|tree> <file.csv> [--commit] [--workers] [--db <path>]";

#[derive(Debug)]
struct CliArgs {
    import_type: ImportType,
    file: PathBuf,
    commit: bool,
    workers: bool,
    db_path: Option<String>,
}

fn parse_args<I: Iterator<Item = String>>(mut args: I) -> anyhow::Result<CliArgs> {
    let mut positional = Vec::new();
    let mut commit = false;
    let mut workers = false;
    let mut db_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--commit" => commit = true,
            "--workers" => workers = true,
            "--db" => {
                let value = args.next().context("--db 缺少路径参数")?;
                db_path = Some(value);
            }
            flag if flag.starts_with("--") => bail!("未知参数: {}", flag),
            _ => positional.push(arg),
        }
    }

    if positional.len() != 2 {
        bail!("需要两个位置参数（导入类型与文件路径）");
    }
    let import_type = parse_import_type(&positional[0])?;

    Ok(CliArgs {
        import_type,
        file: PathBuf::from(&positional[1]),
        commit,
        workers,
        db_path,
    })
}

fn run(args: CliArgs) -> anyhow::Result<()> {
    let db_path = args.db_path.clone().unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    ensure_schema(&conn).context("数据库建表失败")?;
    let conn = Arc::new(Mutex::new(conn));

    let config = ConfigManager::from_connection(conn.clone())?.load_import_config()?;
    tracing::info!(
        block_size = config.block_size,
        date_format = %config.date_format,
        worker_count = config.worker_count,
        max_retries = config.max_retries,
        "导入配置已加载"
    );

    let report = if args.workers {
        run_with_workers(&args, conn, config)?
    } else {
        run_inline(&args, conn, config)?
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// 进程内同步排空队列
fn run_inline(
    args: &CliArgs,
    conn: Arc<Mutex<Connection>>,
    config: ImportConfig,
) -> anyhow::Result<Value> {
    let queue = Arc::new(InlineTaskQueue::new());
    let pipeline = ImportPipeline::new(conn, config, queue.clone());

    let event_id = pipeline.import_file(args.import_type, &args.file)?;
    let executed = queue.drain(&pipeline)?;
    tracing::info!(event_id, executed, "校验阶段结束");

    if args.commit {
        let status = pipeline.summary(event_id)?.status;
        if status == EventStatus::FinishedVerification {
            pipeline.commit_import_event(args.import_type, event_id)?;
            let executed = queue.drain(&pipeline)?;
            tracing::info!(event_id, executed, "提交阶段结束");
        } else {
            tracing::warn!(event_id, status = %status, "事件未完成校验，跳过提交");
        }
    }

    build_report(&pipeline, event_id)
}

/// tokio 工作池执行（worker 数量与重试上限取自配置）
fn run_with_workers(
    args: &CliArgs,
    conn: Arc<Mutex<Connection>>,
    config: ImportConfig,
) -> anyhow::Result<Value> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("无法创建 tokio 运行时")?;

    runtime.block_on(async {
        let runner = PooledImport::start(conn, config);
        let pipeline = runner.pipeline().clone();

        let event_id = runner.import_file(args.import_type, args.file.clone()).await?;
        let status = runner.wait_until_settled(event_id).await?;
        tracing::info!(event_id, status = %status, "校验阶段结束");

        if args.commit {
            if status == EventStatus::FinishedVerification {
                pipeline.commit_import_event(args.import_type, event_id)?;
                let status = runner.wait_until_settled(event_id).await?;
                tracing::info!(event_id, status = %status, "提交阶段结束");
            } else {
                tracing::warn!(event_id, status = %status, "事件未完成校验，跳过提交");
            }
        }

        let stats = runner.shutdown().await;
        tracing::info!(
            succeeded = stats.succeeded,
            retried = stats.retried,
            failed = stats.failed,
            "工作池统计"
        );
        build_report(&pipeline, event_id)
    })
}

fn build_report(pipeline: &ImportPipeline, event_id: i64) -> anyhow::Result<Value> {
    Ok(json!({
        "summary": pipeline.summary(event_id)?,
        "row_errors": pipeline.row_errors(event_id)?,
    }))
}

fn main() {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", tree_import::APP_NAME, tree_import::VERSION);
    tracing::info!("==================================================");

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        tracing::error!("导入失败: {:#}", e);
        eprintln!("导入失败: {:#}", e);
        std::process::exit(1);
    }
}
