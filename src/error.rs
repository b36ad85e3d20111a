// 错误处理模块

use thiserror::Error;
use serde::Serialize;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("无法打开视频源: {0}")]
    SourceOpen(String),

    #[error("读取视频帧失败: {0}")]
    SourceRead(String),

    #[error("无法创建输出视频: {0}")]
    SinkInit(String),

    #[error("写入视频帧失败: {0}")]
    SinkWrite(String),

    #[error("转码失败: {0}")]
    Transcode(String),

    #[error("手部检测错误: {0}")]
    Detection(String),

    /// 检测进程退出、管道断开或无响应，任何策略下都终止任务
    #[error("检测进程异常: {0}")]
    DetectorFailed(String),

    #[error("处理超时: 已运行 {0} 秒")]
    Timeout(u64),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("依赖缺失: {0}")]
    DependencyMissing(String),

    #[error("任务已取消")]
    Cancelled,

    #[error("后台任务异常: {0}")]
    Task(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),
}

// 实现 Serialize 以便写入 JSON 报告
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
