// FFmpeg 封装模块
//
// 解码：ffmpeg 将输入解码为 rawvideo rgb24 写到 stdout，逐帧读取
// 编码：逐帧将 rgb24 写入 ffmpeg stdin，输出 MPEG-4 (XviD) AVI 中间文件
// 转码：中间文件转为浏览器可播放的 H.264 MP4

use crate::config::TranscodeConfig;
use crate::error::{AppError, AppResult};
use crate::utils::{VideoInfo, hidden_command, resolve_tool_path, spawn_stderr_drain};
use super::{Frame, Transcoder, VideoBackend, VideoSink, VideoSource};
use parking_lot::Mutex;
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 获取视频信息
pub fn get_video_info(video_path: &Path) -> AppResult<VideoInfo> {
    let ffprobe_path = resolve_tool_path("ffprobe");
    let output = hidden_command(&ffprobe_path)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(video_path)
        .output()
        .map_err(|e| AppError::SourceOpen(format!("ffprobe 执行失败: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::SourceOpen(format!("ffprobe 错误: {}", stderr.trim())));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| AppError::SourceOpen(format!("解析 ffprobe 输出失败: {}", e)))?;

    parse_probe_output(video_path, &json)
}

/// 从 ffprobe JSON 中提取第一路视频流的信息
fn parse_probe_output(video_path: &Path, json: &serde_json::Value) -> AppResult<VideoInfo> {
    let streams = json["streams"].as_array()
        .ok_or_else(|| AppError::SourceOpen("无法获取流信息".to_string()))?;

    let stream = streams.iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or_else(|| AppError::SourceOpen(format!("没有视频流: {}", video_path.display())))?;

    let fps = stream["r_frame_rate"].as_str().map(parse_frame_rate).unwrap_or(0.0);
    let frame_count = stream["nb_frames"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok());

    let duration = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let width = stream["width"].as_u64().unwrap_or(0) as u32;
    let height = stream["height"].as_u64().unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(AppError::SourceOpen(format!(
            "无效的视频尺寸 {}x{}: {}",
            width, height, video_path.display()
        )));
    }

    Ok(VideoInfo {
        path: video_path.to_string_lossy().to_string(),
        duration,
        width,
        height,
        fps,
        video_codec: stream["codec_name"].as_str().unwrap_or("").to_string(),
        frame_count,
    })
}

/// 解析帧率字符串（"30000/1001" 或 "25"）
fn parse_frame_rate(fps_str: &str) -> f64 {
    let parts: Vec<&str> = fps_str.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().unwrap_or(0.0);
        let den: f64 = parts[1].parse().unwrap_or(1.0);
        if den > 0.0 {
            return num / den;
        }
    }
    fps_str.parse().unwrap_or(0.0)
}

fn decode_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_string(), "error".to_string(),
        "-nostdin".to_string(),
        // 输出原始存储方向，与 ffprobe 报告的宽高一致
        "-noautorotate".to_string(),
        "-i".to_string(), input.to_string_lossy().to_string(),
        "-map".to_string(), "0:v:0".to_string(),
        "-f".to_string(), "rawvideo".to_string(),
        "-pix_fmt".to_string(), "rgb24".to_string(),
        "pipe:1".to_string(),
    ]
}

fn encode_args(output: &Path, width: u32, height: u32, fps: f64) -> Vec<String> {
    vec![
        "-v".to_string(), "error".to_string(),
        "-f".to_string(), "rawvideo".to_string(),
        "-pix_fmt".to_string(), "rgb24".to_string(),
        "-s".to_string(), format!("{}x{}", width, height),
        "-r".to_string(), format!("{}", fps),
        "-i".to_string(), "pipe:0".to_string(),
        "-an".to_string(),
        "-c:v".to_string(), "mpeg4".to_string(),
        "-vtag".to_string(), "xvid".to_string(),
        "-q:v".to_string(), "3".to_string(),
        "-y".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// 读满缓冲区或遇到 EOF，返回实际读取字节数
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn stderr_message(tail: &Arc<Mutex<String>>) -> String {
    let tail = tail.lock();
    if tail.is_empty() {
        "无详细错误信息".to_string()
    } else {
        tail.clone()
    }
}

/// ffmpeg 解码视频源
pub struct FfmpegSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_tail: Arc<Mutex<String>>,
    info: VideoInfo,
    next_index: u64,
    finished: bool,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> AppResult<Self> {
        if !path.is_file() {
            return Err(AppError::SourceOpen(format!("文件不存在: {}", path.display())));
        }

        let info = get_video_info(path)?;
        info!(
            "[FFMPEG] 打开视频源: {} ({}x{} @ {:.3}fps, codec={}, frames={:?})",
            path.display(), info.width, info.height, info.fps, info.video_codec, info.frame_count
        );

        let ffmpeg_path = resolve_tool_path("ffmpeg");
        let mut child = hidden_command(&ffmpeg_path)
            .args(decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::SourceOpen(format!("ffmpeg 执行失败: {}", e)))?;

        let stdout = child.stdout.take()
            .ok_or_else(|| AppError::SourceOpen("无法获取 FFmpeg 输出流".into()))?;
        let stderr = child.stderr.take()
            .ok_or_else(|| AppError::SourceOpen("无法获取 FFmpeg 错误输出流".into()))?;

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            stderr_tail: spawn_stderr_drain(stderr, "FFMPEG"),
            info,
            next_index: 0,
            finished: false,
        })
    }

    /// 解码进程结束后检查退出状态
    fn finish_decode(&mut self) -> AppResult<()> {
        self.finished = true;
        let status = self.child.wait()
            .map_err(|e| AppError::SourceRead(format!("等待 FFmpeg 退出失败: {}", e)))?;
        if !status.success() {
            error!("[FFMPEG] 解码进程异常退出: {:?}", status.code());
            return Err(AppError::SourceRead(stderr_message(&self.stderr_tail)));
        }
        debug!("[FFMPEG] 解码完成, 共 {} 帧", self.next_index);
        Ok(())
    }
}

impl VideoSource for FfmpegSource {
    fn width(&self) -> u32 {
        self.info.width
    }

    fn height(&self) -> u32 {
        self.info.height
    }

    fn fps(&self) -> f64 {
        self.info.fps
    }

    fn read_frame(&mut self) -> AppResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; Frame::byte_len(self.info.width, self.info.height)];
        let n = read_full(&mut self.stdout, &mut buffer)
            .map_err(|e| AppError::SourceRead(format!("读取解码输出失败: {}", e)))?;

        if n < buffer.len() {
            if n > 0 {
                warn!(
                    "[FFMPEG] 末尾帧不完整 ({}/{} 字节)，按结尾处理",
                    n, buffer.len()
                );
            }
            self.finish_decode()?;
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;
        Frame::from_rgb24(index, self.info.width, self.info.height, buffer)
            .map(Some)
            .ok_or_else(|| AppError::SourceRead(format!("帧 {} 数据长度异常", index)))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// ffmpeg 编码输出（MPEG-4 AVI）
pub struct FfmpegSink {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr_tail: Arc<Mutex<String>>,
    path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
    finished: bool,
}

impl FfmpegSink {
    pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> AppResult<Self> {
        if width == 0 || height == 0 {
            return Err(AppError::SinkInit(format!("无效的输出尺寸 {}x{}", width, height)));
        }
        if !fps.is_finite() || fps <= 0.0 {
            return Err(AppError::SinkInit(format!("无效的输出帧率 {}", fps)));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::SinkInit(format!("创建输出目录失败: {}", e)))?;
        }

        let ffmpeg_path = resolve_tool_path("ffmpeg");
        let mut child = hidden_command(&ffmpeg_path)
            .args(encode_args(path, width, height, fps))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::SinkInit(format!("ffmpeg 执行失败: {}", e)))?;

        let stdin = child.stdin.take()
            .ok_or_else(|| AppError::SinkInit("无法获取 FFmpeg 输入流".into()))?;
        let stderr = child.stderr.take()
            .ok_or_else(|| AppError::SinkInit("无法获取 FFmpeg 错误输出流".into()))?;

        info!("[FFMPEG] 创建中间输出: {} ({}x{} @ {:.3}fps)", path.display(), width, height, fps);

        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            stderr_tail: spawn_stderr_drain(stderr, "FFMPEG"),
            path: path.to_path_buf(),
            width,
            height,
            frames_written: 0,
            finished: false,
        })
    }
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, frame: &Frame) -> AppResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(AppError::SinkWrite(format!(
                "帧 {} 尺寸 {}x{} 与输出 {}x{} 不一致",
                frame.index, frame.width(), frame.height(), self.width, self.height
            )));
        }

        let stdin = self.stdin.as_mut()
            .ok_or_else(|| AppError::SinkWrite("FFmpeg 输入流已关闭".into()))?;
        if let Err(e) = stdin.write_all(frame.as_rgb24()) {
            error!("[FFMPEG] 写入帧 {} 失败: {}", frame.index, e);
            return Err(AppError::SinkWrite(format!(
                "{}: {}", e, stderr_message(&self.stderr_tail)
            )));
        }
        self.frames_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> AppResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()
                .map_err(|e| AppError::SinkWrite(format!("刷新 FFmpeg 输入流失败: {}", e)))?;
        }

        self.finished = true;
        let status = self.child.wait()
            .map_err(|e| AppError::SinkWrite(format!("等待 FFmpeg 退出失败: {}", e)))?;
        if !status.success() {
            error!("[FFMPEG] 编码进程异常退出: {:?}", status.code());
            return Err(AppError::SinkWrite(stderr_message(&self.stderr_tail)));
        }

        info!("[FFMPEG] 中间输出完成: {} ({} 帧)", self.path.display(), self.frames_written);
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// 基于 ffmpeg 子进程的视频源/输出工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl VideoBackend for FfmpegBackend {
    fn open_source(&self, path: &Path) -> AppResult<Box<dyn VideoSource>> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }

    fn create_sink(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> AppResult<Box<dyn VideoSink>> {
        Ok(Box::new(FfmpegSink::create(path, width, height, fps)?))
    }
}

/// H.264 MP4 转码器
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
    keep_audio: bool,
}

impl FfmpegTranscoder {
    /// 最终输出（去除音频）
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config, keep_audio: false }
    }

    /// 上传原片的网页预览版本（保留音频）
    pub fn web_original(config: TranscodeConfig) -> Self {
        Self { config, keep_audio: true }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-v".to_string(), "error".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(), input.to_string_lossy().to_string(),
            // libx264 + yuv420p 要求宽高为偶数
            "-vf".to_string(), "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
            "-c:v".to_string(), self.config.video_codec.clone(),
            "-pix_fmt".to_string(), self.config.pixel_format.clone(),
            "-profile:v".to_string(), self.config.profile.clone(),
            "-preset".to_string(), self.config.preset.clone(),
        ];

        if self.keep_audio {
            args.extend(["-c:a".to_string(), "aac".to_string()]);
        } else {
            args.push("-an".to_string());
        }

        if self.config.faststart {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        args.push("-y".to_string());
        args.push(output.to_string_lossy().to_string());
        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path) -> AppResult<()> {
        info!("[FFMPEG] 开始转码");
        info!("[FFMPEG] 输入: {}", input.display());
        info!("[FFMPEG] 输出: {}", output.display());

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let ffmpeg_path = resolve_tool_path("ffmpeg");
        let args = self.args(input, output);
        debug!("[FFMPEG] 参数: {}", args.join(" "));

        let result = hidden_command(&ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| AppError::Transcode(format!("ffmpeg 执行失败: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            error!("[FFMPEG] 转码失败: {}", stderr);
            // 清理失败的输出文件
            let _ = fs::remove_file(output);
            return Err(AppError::Transcode(stderr));
        }

        info!("[FFMPEG] 转码完成: {}", output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_frame_rate() {
        assert_relative_eq!(parse_frame_rate("30/1"), 30.0);
        assert_relative_eq!(parse_frame_rate("30000/1001"), 29.97002997, epsilon = 1e-6);
        assert_relative_eq!(parse_frame_rate("25"), 25.0);
        assert_relative_eq!(parse_frame_rate("0/0"), 0.0);
        assert_relative_eq!(parse_frame_rate("abc"), 0.0);
    }

    #[test]
    fn test_parse_probe_output_picks_video_stream() {
        let json = serde_json::json!({
            "streams": [
                { "codec_type": "audio", "codec_name": "aac" },
                {
                    "codec_type": "video", "codec_name": "h264",
                    "width": 640, "height": 480,
                    "r_frame_rate": "30000/1001", "nb_frames": "300"
                }
            ],
            "format": { "duration": "10.010000" }
        });
        let info = parse_probe_output(Path::new("clip.mp4"), &json).unwrap();
        assert_eq!((info.width, info.height), (640, 480));
        assert_eq!(info.video_codec, "h264");
        assert_eq!(info.frame_count, Some(300));
        assert_relative_eq!(info.duration, 10.01);
        assert_relative_eq!(info.fps, 29.97002997, epsilon = 1e-6);
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        let json = serde_json::json!({
            "streams": [{ "codec_type": "audio", "codec_name": "aac" }],
            "format": {}
        });
        assert!(matches!(
            parse_probe_output(Path::new("a.mp4"), &json),
            Err(AppError::SourceOpen(_))
        ));
    }

    #[test]
    fn test_decode_args_emit_rgb24() {
        let args = decode_args(Path::new("/videos/in put.mp4"));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert!(args.windows(2).any(|w| w == ["-f", "rawvideo"]));
        // 路径作为单个参数传递，不经过 shell
        assert!(args.contains(&"/videos/in put.mp4".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_parse_probe_output_rejects_zero_size() {
        let json = serde_json::json!({
            "streams": [{ "codec_type": "video", "codec_name": "h264", "r_frame_rate": "25/1" }],
            "format": {}
        });
        assert!(matches!(
            parse_probe_output(Path::new("x.mp4"), &json),
            Err(AppError::SourceOpen(_))
        ));
    }

    #[test]
    fn test_decode_args_disable_autorotate() {
        let args = decode_args(Path::new("/videos/portrait.mov"));
        let noautorotate = args.iter().position(|a| a == "-noautorotate").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        // 必须作为输入选项出现在 -i 之前
        assert!(noautorotate < input);
    }

    #[test]
    fn test_encode_args_geometry_and_codec() {
        let args = encode_args(Path::new("/out/temp_x.avi"), 640, 360, 25.0);
        assert!(args.windows(2).any(|w| w == ["-s", "640x360"]));
        assert!(args.windows(2).any(|w| w == ["-r", "25"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "mpeg4"]));
        assert!(args.windows(2).any(|w| w == ["-vtag", "xvid"]));
        assert_eq!(args.last().map(String::as_str), Some("/out/temp_x.avi"));
    }

    #[test]
    fn test_transcoder_args() {
        let transcoder = FfmpegTranscoder::new(TranscodeConfig::default());
        let args = transcoder.args(Path::new("in.avi"), Path::new("out.mp4"));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert!(args.windows(2).any(|w| w == ["-profile:v", "main"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "fast"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_web_original_keeps_audio() {
        let transcoder = FfmpegTranscoder::web_original(TranscodeConfig::default());
        let args = transcoder.args(Path::new("in.mov"), Path::new("web.mp4"));
        assert!(!args.contains(&"-an".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
    }

    #[test]
    fn test_sink_rejects_bad_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp.avi");
        assert!(matches!(FfmpegSink::create(&path, 0, 480, 30.0), Err(AppError::SinkInit(_))));
        assert!(matches!(FfmpegSink::create(&path, 640, 0, 30.0), Err(AppError::SinkInit(_))));
        assert!(matches!(FfmpegSink::create(&path, 640, 480, 0.0), Err(AppError::SinkInit(_))));
        assert!(matches!(FfmpegSink::create(&path, 640, 480, f64::NAN), Err(AppError::SinkInit(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = FfmpegSource::open(&dir.path().join("missing.mp4"));
        assert!(matches!(result, Err(AppError::SourceOpen(_))));
    }

    #[test]
    fn test_read_full_reports_partial() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader = &data[..];
        let mut buf = [0u8; 4];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 1);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }
}
