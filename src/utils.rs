// 工具模块

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Command};
use std::sync::Arc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Windows 下隐藏控制台窗口的标志
#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;

/// 子进程 stderr 保留的最大字符数（用于错误信息）
const STDERR_TAIL_CHARS: usize = 500;

/// 支持的输入视频扩展名
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];

/// 创建一个隐藏控制台窗口的 Command（Windows 专用）
/// 在非 Windows 平台上等同于 Command::new
#[cfg(target_os = "windows")]
pub fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(target_os = "windows"))]
pub fn hidden_command(program: &str) -> Command {
    Command::new(program)
}

/// 后台持续读取子进程 stderr，避免管道写满阻塞子进程
///
/// 每行以 debug 级别记录，返回最近 500 个字符供错误信息使用。
pub fn spawn_stderr_drain(stderr: ChildStderr, tag: &'static str) -> Arc<Mutex<String>> {
    let tail = Arc::new(Mutex::new(String::new()));
    let writer = tail.clone();
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            debug!("[{}] stderr: {}", tag, line);
            append_tail(&mut writer.lock(), &line);
        }
    });
    tail
}

/// 追加一行并截断到最近 STDERR_TAIL_CHARS 个字符
fn append_tail(tail: &mut String, line: &str) {
    if !tail.is_empty() {
        tail.push('\n');
    }
    tail.push_str(line);
    let excess = tail.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    if excess > 0 {
        *tail = tail.chars().skip(excess).collect();
    }
}

/// 视频信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: String,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    /// 容器中记录的帧数（部分格式不提供）
    pub frame_count: Option<u64>,
}

/// 依赖检查结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<String>,
    pub message: String,
}

/// 生成任务 ID（32 位十六进制）
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 检查文件扩展名是否在支持列表内（不区分大小写）
pub fn is_allowed_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// 获取可执行文件所在目录
pub fn get_exe_dir() -> Option<PathBuf> {
    std::env::current_exe().ok()?.parent().map(|p| p.to_path_buf())
}

/// 获取应用数据目录（可执行文件旁的 data 文件夹）
pub fn get_app_data_dir() -> PathBuf {
    if let Some(exe_dir) = get_exe_dir() {
        // 开发模式下，exe 在 target/debug 目录，需要回到项目根目录
        let in_target = ["target/debug", "target\\debug", "target/release", "target\\release"]
            .iter()
            .any(|suffix| exe_dir.ends_with(suffix));
        if in_target {
            return exe_dir
                .parent()
                .and_then(|p| p.parent())
                .map(|p| p.join("data"))
                .unwrap_or_else(|| exe_dir.join("data"));
        }
        return exe_dir.join("data");
    }

    // 回退到当前工作目录
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("data")
}

/// 解析程序路径，优先使用相对于可执行文件的 ffmpeg 目录
pub fn resolve_tool_path(tool_name: &str) -> String {
    let file_name = format!("{}{}", tool_name, std::env::consts::EXE_SUFFIX);
    if let Some(exe_dir) = get_exe_dir() {
        // 检查 ffmpeg 子目录
        let tool_path = exe_dir.join("ffmpeg").join(&file_name);
        if tool_path.exists() {
            return tool_path.to_string_lossy().to_string();
        }
        // 检查可执行文件同级目录
        let tool_path = exe_dir.join(&file_name);
        if tool_path.exists() {
            return tool_path.to_string_lossy().to_string();
        }
    }
    // 回退到系统 PATH
    tool_name.to_string()
}
