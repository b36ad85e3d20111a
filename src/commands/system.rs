// 系统命令

use crate::config;
use crate::detection::detector::resolve_detector_command;
use crate::utils::{DependencyCheck, resolve_tool_path, hidden_command};
use regex::Regex;
use tracing::info;

lazy_static::lazy_static! {
    static ref VERSION_REGEX: Regex = Regex::new(r"(?i)version\s+([0-9][\w.+-]*)").unwrap();
}

/// 从 `-version` 输出的第一行提取版本号
fn parse_version(output: &str) -> Option<String> {
    let first_line = output.lines().find(|l| !l.trim().is_empty())?;
    VERSION_REGEX
        .captures(first_line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| Some(first_line.trim().to_string()))
}

/// 检查依赖
pub async fn check_dependencies() -> Vec<DependencyCheck> {
    let checks = vec![
        check_ffmpeg_dependency().await,
        check_ffprobe_dependency().await,
        check_detector_dependency().await,
    ];

    for check in &checks {
        info!(
            "[SYSTEM] {}: available={}, version={:?}",
            check.name, check.available, check.version
        );
    }

    checks
}

/// 运行 `<program> <args> <version_flag>`，成功时返回输出中的版本号
fn probe_version(program: &str, args: &[String], version_flag: &str) -> Option<Option<String>> {
    let output = hidden_command(program)
        .args(args)
        .arg(version_flag)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    // 部分程序把版本信息写到 stderr
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if stdout.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        stdout.to_string()
    };
    Some(parse_version(&text))
}

/// 检查 FFmpeg 依赖
async fn check_ffmpeg_dependency() -> DependencyCheck {
    let ffmpeg_path = resolve_tool_path("ffmpeg");
    match probe_version(&ffmpeg_path, &[], "-version") {
        Some(version) => DependencyCheck {
            name: "FFmpeg".to_string(),
            available: true,
            version,
            path: Some(ffmpeg_path),
            message: "FFmpeg 已安装".to_string(),
        },
        None => DependencyCheck {
            name: "FFmpeg".to_string(),
            available: false,
            version: None,
            path: None,
            message: "FFmpeg 未安装，请安装 FFmpeg 并添加到 PATH".to_string(),
        },
    }
}

/// 检查 FFprobe 依赖
async fn check_ffprobe_dependency() -> DependencyCheck {
    let ffprobe_path = resolve_tool_path("ffprobe");
    match probe_version(&ffprobe_path, &[], "-version") {
        Some(version) => DependencyCheck {
            name: "FFprobe".to_string(),
            available: true,
            version,
            path: Some(ffprobe_path),
            message: "FFprobe 已安装".to_string(),
        },
        None => DependencyCheck {
            name: "FFprobe".to_string(),
            available: false,
            version: None,
            path: None,
            message: "FFprobe 未安装，请安装 FFmpeg 并添加到 PATH".to_string(),
        },
    }
}

/// 检查 hand-landmarker 检测程序
async fn check_detector_dependency() -> DependencyCheck {
    let app_config = config::get_config();
    let (program, script_args) = resolve_detector_command(&app_config.detection);
    let display_path = std::iter::once(program.clone())
        .chain(script_args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");

    match probe_version(&program, &script_args, "--version") {
        Some(version) => DependencyCheck {
            name: "hand-landmarker".to_string(),
            available: true,
            version,
            path: Some(display_path),
            message: "手部检测程序可用".to_string(),
        },
        None => DependencyCheck {
            name: "hand-landmarker".to_string(),
            available: false,
            version: None,
            path: Some(display_path),
            message: "手部检测程序不可用，请安装 Python 3.10+ 与 mediapipe，或在配置中指定 detection.command".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffmpeg_version() {
        let output = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023 the FFmpeg developers\nbuilt with gcc 13";
        assert_eq!(parse_version(output), Some("6.1.1-3ubuntu5".to_string()));
    }

    #[test]
    fn test_parse_git_build_version() {
        let output = "ffprobe version n7.0.2 Copyright (c) 2007-2024";
        // 非数字开头的版本号保留整行
        assert_eq!(parse_version(output), Some(output.to_string()));
    }

    #[test]
    fn test_parse_sidecar_version() {
        assert_eq!(
            parse_version("\nhand-landmarker version 1.0.0 (mediapipe 0.10.14)\n"),
            Some("1.0.0".to_string())
        );
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_missing_program_reports_unavailable() {
        assert!(probe_version("/nonexistent/tool-binary", &[], "-version").is_none());
    }
}
