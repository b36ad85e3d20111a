// 逐帧处理流水线
//
// 读取 -> 检测 -> 包围盒 -> 重叠分析 -> 标注 -> 写出，全部结束后转码为最终 MP4。
// 帧严格按源顺序处理，第 i 帧写出后才读取第 i+1 帧。
// 每帧之间检查取消标志与运行时限；任何退出路径都会释放子进程并删除中间文件。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::analysis::{analyze_frame, AnalysisAccumulator, AnalysisSummary};
use crate::config::{AppConfig, DetectionErrorPolicy};
use crate::detection::{BoundingBox, LandmarkDetector, LandmarkSet};
use crate::error::{AppError, AppResult};
use crate::video::annotate::annotate;
use crate::video::{Transcoder, VideoBackend};

/// 流水线当前所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Opening,
    Reading,
    Detecting,
    Analyzing,
    Annotating,
    Writing,
    Finalizing,
    Closed,
    Failed,
}

/// 单次运行参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub processed_dir: PathBuf,
    pub max_hands: usize,
    pub overlap_threshold: f64,
    pub clamp_boxes: bool,
    pub on_detection_error: DetectionErrorPolicy,
    pub max_run: Option<Duration>,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig, data_dir: &Path) -> Self {
        Self {
            processed_dir: config.output.processed_dir_in(data_dir),
            max_hands: config.detection.max_hands,
            overlap_threshold: config.analysis.overlap_threshold,
            clamp_boxes: config.analysis.clamp_boxes,
            on_detection_error: config.analysis.on_detection_error,
            max_run: config.limits.max_run_seconds.map(Duration::from_secs),
        }
    }
}

/// 处理结果
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutput {
    pub output_path: PathBuf,
    pub summary: AnalysisSummary,
}

pub struct FramePipeline {
    backend: Box<dyn VideoBackend>,
    detector: Box<dyn LandmarkDetector>,
    transcoder: Box<dyn Transcoder>,
    settings: PipelineSettings,
    cancel_flag: Arc<AtomicBool>,
    state: PipelineState,
}

impl FramePipeline {
    pub fn new(
        backend: Box<dyn VideoBackend>,
        detector: Box<dyn LandmarkDetector>,
        transcoder: Box<dyn Transcoder>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            backend,
            detector,
            transcoder,
            settings,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            state: PipelineState::Idle,
        }
    }

    /// 共享外部取消标志
    pub fn with_cancel_flag(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = cancel_flag;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// 处理一个视频文件，输出 `<processed_dir>/final_<job_id>.mp4`
    pub fn process(&mut self, input: &Path, job_id: &str) -> AppResult<ProcessOutput> {
        let temp_path = self.settings.processed_dir.join(format!("temp_{}.avi", job_id));
        let final_path = self.settings.processed_dir.join(format!("final_{}.mp4", job_id));

        info!("[PIPELINE] 开始处理: job={}, input={}", job_id, input.display());
        let started = Instant::now();
        let result = self.run(input, &temp_path, &final_path, started);

        // 中间文件在任何情况下都删除
        if temp_path.exists() {
            if let Err(e) = fs::remove_file(&temp_path) {
                warn!("[PIPELINE] 删除中间文件失败: {} ({})", temp_path.display(), e);
            }
        }

        match result {
            Ok(summary) => {
                self.state = PipelineState::Closed;
                info!(
                    "[PIPELINE] 处理完成: job={}, 总帧数={}, 重叠帧数={}, 最多手数={}, 耗时={:.2}s",
                    job_id,
                    summary.total_frames,
                    summary.intersection_frames,
                    summary.max_hands_detected,
                    started.elapsed().as_secs_f64()
                );
                Ok(ProcessOutput { output_path: final_path, summary })
            }
            Err(e) => {
                error!("[PIPELINE] 处理失败: job={}, 阶段={:?}, 错误={}", job_id, self.state, e);
                self.state = PipelineState::Failed;
                if final_path.exists() {
                    let _ = fs::remove_file(&final_path);
                }
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        input: &Path,
        temp_path: &Path,
        final_path: &Path,
        started: Instant,
    ) -> AppResult<AnalysisSummary> {
        self.state = PipelineState::Opening;
        let mut source = self.backend.open_source(input)?;
        let (width, height, fps) = (source.width(), source.height(), source.fps());
        let mut sink = self.backend.create_sink(temp_path, width, height, fps)?;

        let mut accumulator = AnalysisAccumulator::new();
        let mut skipped = 0u64;

        loop {
            self.check_limits(started)?;

            self.state = PipelineState::Reading;
            let frame = match source.read_frame()? {
                Some(frame) => frame,
                None => break,
            };

            self.state = PipelineState::Detecting;
            let mut sets = match self.detector.detect(&frame) {
                Ok(sets) => sets,
                // 只有单帧检测失败可以跳过，检测进程失败总是终止
                Err(AppError::Detection(msg))
                    if self.settings.on_detection_error == DetectionErrorPolicy::Skip =>
                {
                    warn!("[PIPELINE] 帧 {} 检测失败，跳过: {}", frame.index, msg);
                    skipped += 1;
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            sets.truncate(self.settings.max_hands);

            self.state = PipelineState::Analyzing;
            let hands: Vec<(LandmarkSet, BoundingBox)> = sets
                .into_iter()
                .filter_map(|set| {
                    BoundingBox::from_landmarks(&set, frame.width(), frame.height(), self.settings.clamp_boxes)
                        .map(|bbox| (set, bbox))
                })
                .collect();
            let boxes: Vec<BoundingBox> = hands.iter().map(|(_, bbox)| *bbox).collect();
            let intersection = analyze_frame(&boxes, self.settings.overlap_threshold);
            accumulator.update(hands.len(), intersection.as_ref());

            if let Some(result) = &intersection {
                debug!("[PIPELINE] 帧 {}: iou={:.4}, 重叠={}", frame.index, result.iou, result.overlapping);
            }

            let output = if hands.is_empty() {
                frame
            } else {
                self.state = PipelineState::Annotating;
                annotate(&frame, &hands, intersection.as_ref())
            };

            self.state = PipelineState::Writing;
            sink.write_frame(&output)?;
        }

        self.state = PipelineState::Finalizing;
        drop(source);
        sink.finish()?;
        if skipped > 0 {
            warn!("[PIPELINE] 共跳过 {} 帧检测失败的画面", skipped);
        }

        self.transcoder.transcode(temp_path, final_path)?;
        Ok(accumulator.finish())
    }

    fn check_limits(&self, started: Instant) -> AppResult<()> {
        if self.cancel_flag.load(Ordering::SeqCst) {
            return Err(AppError::Cancelled);
        }
        if let Some(max_run) = self.settings.max_run {
            if started.elapsed() > max_run {
                return Err(AppError::Timeout(max_run.as_secs()));
            }
        }
        Ok(())
    }
}
