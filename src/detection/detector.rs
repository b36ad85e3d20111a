// 手部关键点检测核心模块
//
// 检测模型本身由外部 hand-landmarker 程序提供（MediaPipe Hands，视频跟踪模式）。
// 每条流水线独占一个检测进程：模型会跨帧保留跟踪状态，不能被多条流水线并发调用。
//
// 通信协议（stdin/stdout）：
// - 请求：一行 JSON 头 {"index":i,"width":W,"height":H}，紧跟 W*H*3 字节 rgb24 数据
// - 响应：一行 JSON，{"hands":[[[x,y],...],...]} 或 {"error":"..."}
//
// stdout 由独立线程按行读取并经 channel 转交，detect 以 response_timeout_secs 为上限等待；
// 超时的进程会被 kill。{"error"} 响应是单帧失败 (Detection)，进程退出、管道断开、
// 无响应是进程失败 (DetectorFailed)。
//
// 命令解析优先级：
// 1. 配置中的 detection.command
// 2. 打包版本: exe_dir/hand-landmarker/hand-landmarker(.exe)
// 3. Resources: exe_dir/resources/hand-landmarker/hand-landmarker(.exe)
// 4. 开发模式: python python/hand-landmarker/main.py
// 5. 系统 PATH: hand-landmarker

use crate::config::DetectionConfig;
use crate::error::{AppError, AppResult};
use crate::utils::{get_exe_dir, hidden_command, spawn_stderr_drain};
use crate::video::Frame;
use super::landmark::{Landmark, LandmarkSet, HAND_LANDMARK_COUNT};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 手部关键点检测器
///
/// 实现方可以在内部保留跨帧状态，因此调用需要 `&mut self`。
pub trait LandmarkDetector {
    /// 检测一帧中的手，返回顺序由检测器决定
    fn detect(&mut self, frame: &Frame) -> AppResult<Vec<LandmarkSet>>;
}

#[derive(Debug, Serialize)]
struct FrameHeader {
    index: u64,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct DetectorResponse {
    #[serde(default)]
    hands: Vec<Vec<[f32; 2]>>,
    #[serde(default)]
    error: Option<String>,
}

/// 解析检测进程的单行响应
fn parse_response(line: &str) -> AppResult<Vec<LandmarkSet>> {
    let response: DetectorResponse = serde_json::from_str(line.trim())
        .map_err(|e| AppError::Detection(format!("解析检测结果失败: {}", e)))?;

    if let Some(message) = response.error {
        return Err(AppError::Detection(message));
    }

    response.hands
        .into_iter()
        .enumerate()
        .map(|(i, points)| {
            if points.len() != HAND_LANDMARK_COUNT {
                return Err(AppError::Detection(format!(
                    "第 {} 只手的关键点数量异常: {} (期望 {})",
                    i, points.len(), HAND_LANDMARK_COUNT
                )));
            }
            Ok(LandmarkSet::new(
                points.into_iter().map(|[x, y]| Landmark::new(x, y)).collect(),
            ))
        })
        .collect()
}

/// 基于外部 hand-landmarker 进程的检测器
pub struct ProcessLandmarkDetector {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    responses: Receiver<io::Result<String>>,
    response_timeout: Duration,
    stderr_tail: Arc<Mutex<String>>,
}

/// 在后台线程中逐行读取检测进程输出，EOF 时关闭 channel
fn spawn_response_reader(stdout: ChildStdout) -> Receiver<io::Result<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}

impl ProcessLandmarkDetector {
    /// 启动检测进程
    pub fn spawn(config: &DetectionConfig) -> AppResult<Self> {
        let (program, script_args) = resolve_detector_command(config);
        info!("[DETECTOR] 程序: {}", program);
        if !script_args.is_empty() {
            info!("[DETECTOR] 脚本参数: {:?}", script_args);
        }

        let args = detector_args(config);
        info!("[DETECTOR] 检测参数: {}", args.join(" "));

        let mut child = hidden_command(&program)
            .args(&script_args)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("[DETECTOR] 启动 hand-landmarker 失败: {}", e);
                if e.kind() == std::io::ErrorKind::NotFound {
                    AppError::DependencyMissing(format!("找不到 hand-landmarker: {}", program))
                } else {
                    AppError::Detection(format!("启动 hand-landmarker 失败: {}", e))
                }
            })?;

        let stdin = child.stdin.take()
            .ok_or_else(|| AppError::Detection("无法获取 hand-landmarker 输入流".into()))?;
        let stdout = child.stdout.take()
            .ok_or_else(|| AppError::Detection("无法获取 hand-landmarker 输出流".into()))?;
        let stderr = child.stderr.take()
            .ok_or_else(|| AppError::Detection("无法获取 hand-landmarker 错误输出流".into()))?;

        let stderr_tail = spawn_stderr_drain(stderr, "DETECTOR");

        info!("[DETECTOR] hand-landmarker 已启动, pid={}", child.id());

        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            responses: spawn_response_reader(stdout),
            response_timeout: Duration::from_secs(config.response_timeout_secs),
            stderr_tail,
        })
    }

    fn exited_error(&mut self, context: &str) -> AppError {
        let status = self.child.try_wait().ok().flatten();
        let tail = self.stderr_tail.lock().clone();
        error!("[DETECTOR] {}: 退出码={:?}", context, status.and_then(|s| s.code()));
        if tail.is_empty() {
            AppError::DetectorFailed(format!("{}（无详细错误信息）", context))
        } else {
            AppError::DetectorFailed(format!("{}: {}", context, tail))
        }
    }

    /// 等待下一行响应
    fn next_response(&mut self, frame_index: u64) -> AppResult<String> {
        match self.responses.recv_timeout(self.response_timeout) {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(e)) => {
                error!("[DETECTOR] 读取帧 {} 的检测结果失败: {}", frame_index, e);
                Err(AppError::DetectorFailed(format!("读取检测结果失败: {}", e)))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(self.exited_error("hand-landmarker 进程提前退出"))
            }
            Err(RecvTimeoutError::Timeout) => {
                let secs = self.response_timeout.as_secs();
                error!("[DETECTOR] 帧 {} 等待 {} 秒无响应，终止检测进程", frame_index, secs);
                let _ = self.child.kill();
                Err(AppError::DetectorFailed(format!(
                    "hand-landmarker 超过 {} 秒无响应",
                    secs
                )))
            }
        }
    }
}

impl LandmarkDetector for ProcessLandmarkDetector {
    fn detect(&mut self, frame: &Frame) -> AppResult<Vec<LandmarkSet>> {
        let header = serde_json::to_string(&FrameHeader {
            index: frame.index,
            width: frame.width(),
            height: frame.height(),
        })?;

        let stdin = self.stdin.as_mut()
            .ok_or_else(|| AppError::DetectorFailed("hand-landmarker 输入流已关闭".into()))?;
        let write_result = stdin.write_all(header.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.write_all(frame.as_rgb24()))
            .and_then(|_| stdin.flush());
        if let Err(e) = write_result {
            warn!("[DETECTOR] 写入帧 {} 失败: {}", frame.index, e);
            return Err(self.exited_error("hand-landmarker 进程异常"));
        }

        let line = self.next_response(frame.index)?;
        let hands = parse_response(&line)?;
        debug!("[DETECTOR] 帧 {}: 检测到 {} 只手", frame.index, hands.len());
        Ok(hands)
    }
}

impl Drop for ProcessLandmarkDetector {
    fn drop(&mut self) {
        // 关闭 stdin 让检测进程自然退出，再兜底 kill
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!("[DETECTOR] hand-landmarker 已回收");
    }
}

/// 构建检测参数
fn detector_args(config: &DetectionConfig) -> Vec<String> {
    vec![
        "--max_num_hands".to_string(), config.max_hands.to_string(),
        "--min_detection_confidence".to_string(), config.min_detection_confidence.to_string(),
        "--min_tracking_confidence".to_string(), config.min_tracking_confidence.to_string(),
        "--model_complexity".to_string(), config.model_complexity.to_string(),
    ]
}

/// 解析 hand-landmarker 命令
/// 返回 (程序路径, 额外参数)
pub fn resolve_detector_command(config: &DetectionConfig) -> (String, Vec<String>) {
    if let Some((program, rest)) = config.command.split_first() {
        return (program.clone(), rest.to_vec());
    }

    let exe_name = format!("hand-landmarker{}", std::env::consts::EXE_SUFFIX);

    if let Some(exe_dir) = get_exe_dir() {
        let bundled_path = exe_dir.join("hand-landmarker").join(&exe_name);
        if bundled_path.exists() {
            return (bundled_path.to_string_lossy().to_string(), vec![]);
        }

        let resources_path = exe_dir.join("resources").join("hand-landmarker").join(&exe_name);
        if resources_path.exists() {
            return (resources_path.to_string_lossy().to_string(), vec![]);
        }

        if let Some(script_path) = find_dev_script(&exe_dir) {
            info!("[DETECTOR] 使用开发模式 Python 脚本: {}", script_path.display());
            return (
                "python".to_string(),
                vec![script_path.to_string_lossy().to_string()],
            );
        }
    }

    ("hand-landmarker".to_string(), vec![])
}

/// 向上查找项目目录中的 python/hand-landmarker/main.py
fn find_dev_script(exe_dir: &Path) -> Option<PathBuf> {
    exe_dir
        .ancestors()
        .map(|p| p.join("python").join("hand-landmarker").join("main.py"))
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand_json(x: f32) -> String {
        let points: Vec<String> = (0..HAND_LANDMARK_COUNT)
            .map(|i| format!("[{},{}]", x, i as f32 / 100.0))
            .collect();
        format!("[{}]", points.join(","))
    }

    #[test]
    fn test_parse_two_hands() {
        let line = format!("{{\"hands\":[{},{}]}}\n", hand_json(0.25), hand_json(0.5));
        let hands = parse_response(&line).unwrap();
        assert_eq!(hands.len(), 2);
        assert_eq!(hands[0].points().len(), HAND_LANDMARK_COUNT);
        assert_eq!(hands[1].points()[3], Landmark::new(0.5, 0.03));
    }

    #[test]
    fn test_parse_no_hands() {
        assert!(parse_response(r#"{"hands":[]}"#).unwrap().is_empty());
        assert!(parse_response("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_response() {
        let err = parse_response(r#"{"error":"bad frame"}"#).unwrap_err();
        assert!(matches!(err, AppError::Detection(ref m) if m == "bad frame"));
    }

    #[test]
    fn test_parse_rejects_wrong_landmark_count() {
        let err = parse_response(r#"{"hands":[[[0.1,0.2],[0.3,0.4]]]}"#).unwrap_err();
        assert!(matches!(err, AppError::Detection(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_response("not json"), Err(AppError::Detection(_))));
    }

    #[test]
    fn test_command_override() {
        let config = DetectionConfig {
            command: vec!["python3".to_string(), "/opt/hl/main.py".to_string()],
            ..DetectionConfig::default()
        };
        let (program, args) = resolve_detector_command(&config);
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["/opt/hl/main.py".to_string()]);
    }

    #[test]
    fn test_detector_args_carry_config() {
        let args = detector_args(&DetectionConfig::default());
        assert_eq!(args, vec![
            "--max_num_hands", "2",
            "--min_detection_confidence", "0.7",
            "--min_tracking_confidence", "0.5",
            "--model_complexity", "0",
        ]);
    }

    #[test]
    fn test_spawn_missing_program_is_dependency_error() {
        let config = DetectionConfig {
            command: vec!["/nonexistent/hand-landmarker-binary".to_string()],
            ..DetectionConfig::default()
        };
        assert!(matches!(
            ProcessLandmarkDetector::spawn(&config),
            Err(AppError::DependencyMissing(_))
        ));
    }

    #[cfg(unix)]
    fn shell_detector(script: &str, timeout_secs: u64) -> ProcessLandmarkDetector {
        let config = DetectionConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            response_timeout_secs: timeout_secs,
            ..DetectionConfig::default()
        };
        ProcessLandmarkDetector::spawn(&config).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_process_is_detector_failure() {
        let mut detector = shell_detector("exit 0", 5);
        let frame = Frame::filled(0, 4, 4, [0, 0, 0]);
        let err = detector.detect(&frame).unwrap_err();
        assert!(matches!(err, AppError::DetectorFailed(_)), "got {:?}", err);
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_process_times_out() {
        // 读走所有输入但从不回应
        let mut detector = shell_detector("cat > /dev/null", 1);
        let frame = Frame::filled(0, 4, 4, [0, 0, 0]);
        let started = std::time::Instant::now();
        let err = detector.detect(&frame).unwrap_err();
        assert!(matches!(err, AppError::DetectorFailed(ref m) if m.contains("无响应")), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_error_response_stays_per_frame() {
        let mut detector = shell_detector(
            r#"while IFS= read -r header; do head -c 48 > /dev/null; echo '{"error":"bad frame"}'; done"#,
            5,
        );
        let frame = Frame::filled(0, 4, 4, [0, 0, 0]);
        for _ in 0..2 {
            let err = detector.detect(&frame).unwrap_err();
            assert!(matches!(err, AppError::Detection(ref m) if m == "bad frame"), "got {:?}", err);
        }
    }
}
