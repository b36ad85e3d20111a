// 分析任务命令
//
// 流程：校验输入 → 获取任务许可 → （可选）生成网页版原片 → 逐帧分析 → 生成报告
// 并发任务数由 JOB_SEMAPHORE 限制（limits.max_concurrent_jobs），
// 每个任务独占一个 hand-landmarker 进程，在阻塞线程中运行。

use crate::config::{self, AppConfig};
use crate::detection::ProcessLandmarkDetector;
use crate::error::{AppError, AppResult};
use crate::pipeline::{FramePipeline, PipelineSettings};
use crate::analysis::AnalysisSummary;
use crate::utils::{generate_id, is_allowed_video, ALLOWED_EXTENSIONS};
use crate::video::ffmpeg::{get_video_info, FfmpegBackend, FfmpegTranscoder};
use crate::video::Transcoder;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{info, warn};
use walkdir::WalkDir;

/// 分析任务信号量，容量取自首次使用时的配置
static JOB_SEMAPHORE: OnceCell<Semaphore> = OnceCell::new();

/// 单个视频的分析报告
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub job_id: String,
    /// 用户提供的输入路径
    pub input: String,
    /// 实际分析的视频（网页版原片或输入本身）
    pub original: String,
    /// 标注后的最终输出
    pub processed: String,
    pub analysis: AnalysisSummary,
    /// RFC 3339 完成时间
    pub finished_at: String,
}

/// 展开输入列表：文件原样保留，目录递归查找支持的视频文件
pub fn scan_video_files(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }

        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("[JOB] 扫描目录出错: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_allowed_video(path))
            .collect();
        found.sort();

        info!("[JOB] 目录 {} 中找到 {} 个视频", input.display(), found.len());
        files.extend(found);
    }

    files
}

/// 校验输入文件
fn validate_input(input: &Path) -> AppResult<()> {
    if !is_allowed_video(input) {
        return Err(AppError::InvalidArgument(format!(
            "不支持的文件类型: {}（支持: {}）",
            input.display(),
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    if !input.is_file() {
        return Err(AppError::SourceOpen(format!("文件不存在: {}", input.display())));
    }
    Ok(())
}

/// 获取任务许可，排队期间响应取消
async fn acquire_job_permit(
    job_id: &str,
    max_jobs: usize,
    cancel_flag: &AtomicBool,
) -> AppResult<SemaphorePermit<'static>> {
    let semaphore = JOB_SEMAPHORE.get_or_init(|| Semaphore::new(max_jobs));

    if let Ok(permit) = semaphore.try_acquire() {
        info!("[JOB] 直接获取任务许可: job={}", job_id);
        return Ok(permit);
    }

    info!("[JOB] 任务繁忙，排队等待: job={}", job_id);
    loop {
        tokio::select! {
            result = semaphore.acquire() => {
                return result
                    .map(|permit| {
                        info!("[JOB] 排队结束，获取许可: job={}", job_id);
                        permit
                    })
                    .map_err(|_| AppError::Task("任务信号量异常关闭".to_string()));
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                if cancel_flag.load(Ordering::SeqCst) {
                    info!("[JOB] 排队等待中被取消: job={}", job_id);
                    return Err(AppError::Cancelled);
                }
            }
        }
    }
}

/// 分析一个视频文件
pub async fn analyze_video(
    input: PathBuf,
    data_dir: PathBuf,
    cancel_flag: Arc<AtomicBool>,
) -> AppResult<AnalysisReport> {
    validate_input(&input)?;

    let job_id = generate_id();
    let app_config = config::get_config();
    info!("[JOB] === 开始分析 === job={}, input={}", job_id, input.display());

    let _permit = acquire_job_permit(&job_id, app_config.limits.max_concurrent_jobs, &cancel_flag).await?;

    let report = tokio::task::spawn_blocking(move || {
        run_job(&input, &job_id, &data_dir, &app_config, cancel_flag)
    })
    .await
    .map_err(|e| AppError::Task(e.to_string()))??;

    info!(
        "[JOB] === 分析完成 === job={}, 总帧数={}, 重叠帧数={}",
        report.job_id, report.analysis.total_frames, report.analysis.intersection_frames
    );
    Ok(report)
}

/// 在阻塞线程中执行的任务主体
fn run_job(
    input: &Path,
    job_id: &str,
    data_dir: &Path,
    app_config: &AppConfig,
    cancel_flag: Arc<AtomicBool>,
) -> AppResult<AnalysisReport> {
    // 先探测输入，损坏或无视频流的文件在转码前就以 SourceOpen 失败
    let info = get_video_info(input)?;
    info!(
        "[JOB] 输入视频: {}x{}, {:.2} fps, 编码 {}",
        info.width, info.height, info.fps, info.video_codec
    );

    let original = if app_config.output.prepare_web_original {
        let web_path = app_config
            .output
            .upload_dir_in(data_dir)
            .join(format!("web_{}.mp4", job_id));
        info!("[JOB] 生成网页版原片: {}", web_path.display());
        FfmpegTranscoder::web_original(app_config.transcode.clone()).transcode(input, &web_path)?;
        web_path
    } else {
        input.to_path_buf()
    };

    if cancel_flag.load(Ordering::SeqCst) {
        return Err(AppError::Cancelled);
    }

    let detector = ProcessLandmarkDetector::spawn(&app_config.detection)?;
    let mut pipeline = FramePipeline::new(
        Box::new(FfmpegBackend),
        Box::new(detector),
        Box::new(FfmpegTranscoder::new(app_config.transcode.clone())),
        PipelineSettings::from_config(app_config, data_dir),
    )
    .with_cancel_flag(cancel_flag);

    let result = pipeline.process(&original, job_id);
    info!("[JOB] 流水线结束状态: {:?}, job={}", pipeline.state(), job_id);
    let output = result?;

    Ok(AnalysisReport {
        job_id: job_id.to_string(),
        input: input.to_string_lossy().to_string(),
        original: original.to_string_lossy().to_string(),
        processed: output.output_path.to_string_lossy().to_string(),
        analysis: output.summary,
        finished_at: chrono::Local::now().to_rfc3339(),
    })
}
