// HandOverlap - 视频手部重叠分析工具
// 主入口文件

mod analysis;
mod commands;
mod config;
mod detection;
mod error;
mod logging;
mod pipeline;
mod utils;
mod video;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::AppResult;

/// 命令行参数
#[derive(Parser)]
#[command(name = "hand-overlap", about = "检测视频中的手部并统计双手重叠帧", version)]
struct Cli {
    /// 数据目录（默认为可执行文件旁的 data 目录）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// 配置文件路径（默认为 <data-dir>/config.json）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 分析视频文件或目录，每个输入输出一份 JSON 报告
    Analyze {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// 检查 ffmpeg / ffprobe / hand-landmarker 是否可用
    Check,
    /// 打印当前生效的配置
    Config {
        /// 恢复默认配置
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_dir = cli.data_dir.clone().unwrap_or_else(utils::get_app_data_dir);
    let config_path = cli.config.clone().unwrap_or_else(|| app_dir.join("config.json"));

    // guard 必须保持存活，否则异步日志线程会退出
    let _log_guard = logging::init_logging(&app_dir, &config_path);

    info!("HandOverlap 启动中...");
    info!("数据目录: {:?}", app_dir);

    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        warn!("创建应用数据目录失败: {}", e);
    }

    if let Err(e) = config::init_config(&config_path) {
        error!("配置初始化失败: {}", e);
        eprintln!("配置初始化失败: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Analyze { inputs } => run_analyze(inputs, app_dir).await,
        Commands::Check => run_check().await,
        Commands::Config { reset } => run_config(reset).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// 分析全部输入，返回是否全部成功
async fn run_analyze(inputs: Vec<PathBuf>, app_dir: PathBuf) -> AppResult<bool> {
    let files = commands::analyze::scan_video_files(&inputs);
    if files.is_empty() {
        warn!("[JOB] 没有找到可分析的视频");
        eprintln!("没有找到可分析的视频");
        return Ok(false);
    }

    // Ctrl-C 设置取消标志，流水线在帧间检查
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let signal_flag = cancel_flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[JOB] 收到中断信号，正在取消任务...");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let handles: Vec<_> = files
        .into_iter()
        .map(|file| {
            let data_dir = app_dir.clone();
            let flag = cancel_flag.clone();
            let input = file.clone();
            (file, tokio::spawn(commands::analyze::analyze_video(input, data_dir, flag)))
        })
        .collect();

    let mut all_ok = true;
    for (file, handle) in handles {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(error::AppError::Task(e.to_string())),
        };

        let value = match outcome {
            Ok(report) => serde_json::json!({ "input": file, "report": report }),
            Err(e) => {
                all_ok = false;
                error!("[JOB] 分析失败: {}: {}", file.display(), e);
                serde_json::json!({ "input": file, "error": e })
            }
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
    }

    Ok(all_ok)
}

async fn run_check() -> AppResult<bool> {
    let checks = commands::system::check_dependencies().await;
    println!("{}", serde_json::to_string_pretty(&checks)?);
    Ok(checks.iter().all(|c| c.available))
}

async fn run_config(reset: bool) -> AppResult<bool> {
    let config = if reset {
        commands::config::reset_config().await?
    } else {
        commands::config::get_config().await?
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(true)
}
