// 视频处理模块
//
// - frame: RGB 帧
// - annotate: 帧标注
// - ffmpeg: 基于 ffmpeg/ffprobe 子进程的解码、编码与转码

pub mod annotate;
pub mod ffmpeg;
pub mod frame;

pub use frame::Frame;

use std::path::Path;

use crate::error::AppResult;

/// 顺序读取的视频源
pub trait VideoSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn fps(&self) -> f64;

    /// 读取下一帧，`Ok(None)` 表示已到结尾
    fn read_frame(&mut self) -> AppResult<Option<Frame>>;
}

/// 顺序写入的视频输出
pub trait VideoSink {
    fn write_frame(&mut self, frame: &Frame) -> AppResult<()>;

    /// 结束写入并等待编码完成
    fn finish(self: Box<Self>) -> AppResult<()>;
}

/// 将中间文件转为最终格式
pub trait Transcoder {
    fn transcode(&self, input: &Path, output: &Path) -> AppResult<()>;
}

/// 创建视频源与输出的工厂
pub trait VideoBackend {
    fn open_source(&self, path: &Path) -> AppResult<Box<dyn VideoSource>>;

    fn create_sink(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> AppResult<Box<dyn VideoSink>>;
}
