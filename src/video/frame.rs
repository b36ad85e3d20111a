// 视频帧

use image::RgbImage;

/// 一帧 RGB 画面及其在源视频中的序号（从 0 开始）
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// 由 rgb24 原始字节构建，长度必须等于 `width * height * 3`
    pub fn from_rgb24(index: u64, width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != Self::byte_len(width, height) {
            return None;
        }
        RgbImage::from_raw(width, height, data).map(|image| Self { index, image })
    }

    /// 纯色帧
    #[cfg(test)]
    pub fn filled(index: u64, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            index,
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// rgb24 字节数
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn as_rgb24(&self) -> &[u8] {
        self.image.as_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb24_checks_length() {
        assert!(Frame::from_rgb24(0, 2, 2, vec![0; 12]).is_some());
        assert!(Frame::from_rgb24(0, 2, 2, vec![0; 11]).is_none());
        assert!(Frame::from_rgb24(0, 2, 2, vec![0; 13]).is_none());
        assert_eq!(Frame::byte_len(2, 2), 12);
    }
}
