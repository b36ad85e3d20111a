// 配置管理模块

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use crate::analysis::overlap::DEFAULT_OVERLAP_THRESHOLD;
use crate::error::{AppError, AppResult};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::info;

static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();
static CONFIG_PATH: OnceCell<PathBuf> = OnceCell::new();

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 单帧检测失败时的处理策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectionErrorPolicy {
    /// 终止整个任务
    Abort,
    /// 跳过该帧（原样写出，按 0 只手计入统计）
    Skip,
}

impl Default for DetectionErrorPolicy {
    fn default() -> Self {
        Self::Abort
    }
}

/// 手部检测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// 每帧最多检测的手数
    pub max_hands: usize,
    /// 检测置信度阈值 (0.0 - 1.0)
    pub min_detection_confidence: f32,
    /// 跟踪置信度阈值 (0.0 - 1.0)
    pub min_tracking_confidence: f32,
    /// 模型复杂度 (0 = lite, 1 = full)
    pub model_complexity: u8,
    /// 自定义检测程序命令（为空时自动解析 hand-landmarker）
    pub command: Vec<String>,
    /// 单帧等待检测结果的最长秒数，超时视为检测进程挂起
    pub response_timeout_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_hands: 2,
            min_detection_confidence: 0.7,
            min_tracking_confidence: 0.5,
            model_complexity: 0,
            command: Vec::new(),
            response_timeout_secs: 30,
        }
    }
}

/// 重叠分析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// IOU 超过该值视为双手重叠
    pub overlap_threshold: f64,
    /// 是否将包围盒裁剪到画面范围内
    pub clamp_boxes: bool,
    /// 检测失败处理策略
    pub on_detection_error: DetectionErrorPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            clamp_boxes: true,
            on_detection_error: DetectionErrorPolicy::Abort,
        }
    }
}

/// 输出目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 网页版原始视频目录（相对路径基于数据目录）
    pub upload_dir: PathBuf,
    /// 处理结果目录（相对路径基于数据目录）
    pub processed_dir: PathBuf,
    /// 分析前是否先把输入转为网页可播放的 H.264 原片
    pub prepare_web_original: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            processed_dir: PathBuf::from("processed"),
            prepare_web_original: true,
        }
    }
}

impl OutputConfig {
    pub fn upload_dir_in(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.upload_dir)
    }

    pub fn processed_dir_in(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.processed_dir)
    }
}

/// 转码配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub video_codec: String,
    pub pixel_format: String,
    pub profile: String,
    pub preset: String,
    /// MP4 moov atom 前置，支持边下边播
    pub faststart: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            profile: "main".to_string(),
            preset: "fast".to_string(),
            faststart: true,
        }
    }
}

/// 运行限制
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// 单个任务最长运行时间（秒），None 表示不限制
    pub max_run_seconds: Option<u64>,
    /// 同时运行的任务数
    pub max_concurrent_jobs: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_run_seconds: None,
            max_concurrent_jobs: 1,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// 日志级别
    #[serde(default)]
    pub log_level: LogLevel,
}

impl AppConfig {
    /// 校验配置取值范围
    pub fn validate(&self) -> AppResult<()> {
        if self.detection.max_hands == 0 {
            return Err(AppError::Config("max_hands 必须大于 0".to_string()));
        }
        if self.detection.response_timeout_secs == 0 {
            return Err(AppError::Config("response_timeout_secs 必须大于 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.analysis.overlap_threshold) {
            return Err(AppError::Config(format!(
                "overlap_threshold 超出范围 [0, 1]: {}",
                self.analysis.overlap_threshold
            )));
        }
        if self.limits.max_concurrent_jobs == 0 {
            return Err(AppError::Config("max_concurrent_jobs 必须大于 0".to_string()));
        }
        Ok(())
    }
}

/// 从文件读取配置，文件不存在时写入默认配置
pub fn load_config_file(config_path: &Path) -> AppResult<AppConfig> {
    let config = if config_path.exists() {
        let content = fs::read_to_string(config_path)?;
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("[CONFIG] 配置文件 JSON 解析失败: {}，使用默认配置", e);
            AppConfig::default()
        })
    } else {
        let config = AppConfig::default();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(config_path, content)?;
        config
    };

    config.validate()?;
    Ok(config)
}

/// 初始化配置
pub fn init_config(config_path: &Path) -> AppResult<()> {
    CONFIG_PATH.set(config_path.to_path_buf())
        .map_err(|_| AppError::Config("配置路径已初始化".to_string()))?;

    let config = load_config_file(config_path)?;

    info!("[CONFIG] 配置已加载: {}", config_path.display());

    CONFIG.set(RwLock::new(config))
        .map_err(|_| AppError::Config("配置已初始化".to_string()))?;

    Ok(())
}

/// 获取配置
pub fn get_config() -> AppConfig {
    CONFIG.get()
        .map(|c| c.read().clone())
        .unwrap_or_default()
}

/// 更新配置
pub fn update_config(config: AppConfig) -> AppResult<()> {
    config.validate()?;
    info!("[CONFIG] 配置更新");

    // 先写入文件，成功后再更新内存
    if let Some(path) = CONFIG_PATH.get() {
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(path, content)?;
    }

    if let Some(lock) = CONFIG.get() {
        let mut current = lock.write();
        *current = config;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_detector() {
        let config = AppConfig::default();
        assert_eq!(config.detection.max_hands, 2);
        assert_eq!(config.detection.min_detection_confidence, 0.7);
        assert_eq!(config.detection.min_tracking_confidence, 0.5);
        assert_eq!(config.detection.model_complexity, 0);
        assert_eq!(config.detection.response_timeout_secs, 30);
        assert_eq!(config.analysis.overlap_threshold, 0.05);
        assert_eq!(config.analysis.on_detection_error, DetectionErrorPolicy::Abort);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"analysis": {"overlap_threshold": 0.2}, "log_level": "debug"}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.analysis.overlap_threshold, 0.2);
        assert!(config.analysis.clamp_boxes);
        assert_eq!(config.detection.max_hands, 2);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.transcode.video_codec, "libx264");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = load_config_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.limits.max_concurrent_jobs, 1);
    }

    #[test]
    fn test_load_falls_back_on_broken_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.detection.max_hands, 2);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = AppConfig::default();
        config.analysis.overlap_threshold = 1.5;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = AppConfig::default();
        config.detection.max_hands = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.response_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
