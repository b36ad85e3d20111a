// 包围盒提取
//
// 由关键点极值得到像素坐标系下的轴对齐包围盒。

use serde::{Deserialize, Serialize};

use super::landmark::LandmarkSet;

/// 像素坐标轴对齐矩形，`min_x <= max_x`，`min_y <= max_y`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl BoundingBox {
    /// 由两角坐标创建，坐标顺序颠倒时自动交换
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    /// 计算关键点集合的包围盒
    ///
    /// 左上角向下取整、右下角向上取整。`clamp` 为 true 时裁剪到 `[0, width] x [0, height]`。
    /// 空集合返回 `None`。
    pub fn from_landmarks(set: &LandmarkSet, width: u32, height: u32, clamp: bool) -> Option<Self> {
        if set.is_empty() {
            return None;
        }
        let mut iter = set.points().iter().map(|lm| lm.to_pixel(width, height));
        let (x0, y0) = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let bbox = Self::new(
            min_x.floor() as i32,
            min_y.floor() as i32,
            max_x.ceil() as i32,
            max_y.ceil() as i32,
        );

        Some(if clamp { bbox.clamp_to(width, height) } else { bbox })
    }

    /// 裁剪到画面范围
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        Self {
            min_x: self.min_x.clamp(0, w),
            min_y: self.min_y.clamp(0, h),
            max_x: self.max_x.clamp(0, w),
            max_y: self.max_y.clamp(0, h),
        }
    }

    #[inline]
    pub fn width(&self) -> i64 {
        self.max_x as i64 - self.min_x as i64
    }

    #[inline]
    pub fn height(&self) -> i64 {
        self.max_y as i64 - self.min_y as i64
    }

    /// 面积；极端坐标下宽高之积会超出 i64，因此用 i128
    #[inline]
    pub fn area(&self) -> i128 {
        self.width() as i128 * self.height() as i128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::landmark::Landmark;

    fn set(points: &[(f32, f32)]) -> LandmarkSet {
        LandmarkSet::new(points.iter().map(|&(x, y)| Landmark::new(x, y)).collect())
    }

    #[test]
    fn test_floor_and_ceil_extrema() {
        let hand = set(&[(0.101, 0.25), (0.5, 0.333), (0.3, 0.9)]);
        let bbox = BoundingBox::from_landmarks(&hand, 100, 200, true).unwrap();
        // 0.101*100=10.1 -> 10, 0.25*200=50, 0.5*100=50, 0.9*200=180
        assert_eq!(bbox, BoundingBox::new(10, 50, 50, 180));
    }

    #[test]
    fn test_single_point_has_zero_area() {
        let hand = set(&[(0.5, 0.5)]);
        let bbox = BoundingBox::from_landmarks(&hand, 10, 10, true).unwrap();
        assert_eq!(bbox, BoundingBox::new(5, 5, 5, 5));
        assert_eq!(bbox.area(), 0);
    }

    #[test]
    fn test_out_of_frame_landmarks() {
        let hand = set(&[(-0.0625, 0.5), (1.03125, 1.125)]);
        let clamped = BoundingBox::from_landmarks(&hand, 64, 64, true).unwrap();
        assert_eq!(clamped, BoundingBox::new(0, 32, 64, 64));

        let raw = BoundingBox::from_landmarks(&hand, 64, 64, false).unwrap();
        assert_eq!(raw, BoundingBox::new(-4, 32, 66, 72));
    }

    #[test]
    fn test_empty_set_has_no_box() {
        assert!(BoundingBox::from_landmarks(&LandmarkSet::new(Vec::new()), 10, 10, true).is_none());
    }

    #[test]
    fn test_unclamped_extreme_box_area() {
        let hand = set(&[(-1.0e9, -1.0e9), (1.0e9, 1.0e9)]);
        let raw = BoundingBox::from_landmarks(&hand, 1920, 1080, false).unwrap();
        assert_eq!((raw.min_x, raw.max_x), (i32::MIN, i32::MAX));
        let side = i32::MAX as i128 - i32::MIN as i128;
        assert_eq!(raw.area(), side * side);
    }

    #[test]
    fn test_new_normalizes_corners() {
        let bbox = BoundingBox::new(10, 20, 0, 5);
        assert_eq!((bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y), (0, 5, 10, 20));
    }
}
