// 帧标注
//
// 在帧上绘制手部骨架、每只手的包围盒，以及双手重叠区域和提示文字。
// 标注不修改输入帧，返回新的帧。所有绘制都会裁剪到画面范围内。

use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle, Rectangle},
    text::Text,
};
use image::{Rgb, RgbImage};

use crate::analysis::IntersectionResult;
use crate::detection::landmark::{Landmark, HAND_CONNECTIONS};
use crate::detection::{BoundingBox, LandmarkSet};
use super::Frame;

/// 重叠提示文字
pub const OVERLAP_LABEL: &str = "HANDS INTERSECTING";
/// 提示文字左下角位置
pub const OVERLAP_LABEL_POS: (i32, i32) = (50, 80);

pub const BOX_COLOR: Rgb888 = Rgb888::new(0, 255, 0);
pub const OVERLAP_COLOR: Rgb888 = Rgb888::new(0, 0, 255);
pub const CONNECTION_COLOR: Rgb888 = Rgb888::new(224, 224, 224);
pub const LANDMARK_COLOR: Rgb888 = Rgb888::new(255, 48, 48);

const BOX_STROKE: u32 = 2;
const OVERLAP_STROKE: u32 = 3;
const CONNECTION_STROKE: u32 = 2;
const LANDMARK_DIAMETER: u32 = 5;

/// 绘制标注并返回新帧
///
/// `hands` 为每只手的关键点与包围盒；`intersection` 仅在重叠时绘制重叠区域和提示文字。
pub fn annotate(
    frame: &Frame,
    hands: &[(LandmarkSet, BoundingBox)],
    intersection: Option<&IntersectionResult>,
) -> Frame {
    let mut image = frame.image.clone();
    let (width, height) = image.dimensions();

    {
        let mut target = Target(&mut image);
        for (landmarks, bbox) in hands {
            draw_skeleton(&mut target, landmarks, width, height);
            draw_box(&mut target, bbox, BOX_COLOR, BOX_STROKE);
        }

        if let Some(result) = intersection.filter(|r| r.overlapping) {
            if let Some(rect) = &result.overlap_rect {
                draw_box(&mut target, rect, OVERLAP_COLOR, OVERLAP_STROKE);
            }
            draw_label(&mut target, OVERLAP_LABEL, OVERLAP_LABEL_POS, OVERLAP_COLOR);
        }
    }

    Frame::new(frame.index, image)
}

fn pixel_point(landmark: Landmark, width: u32, height: u32) -> Point {
    let (x, y) = landmark.to_pixel(width, height);
    Point::new(x.round() as i32, y.round() as i32)
}

fn draw_skeleton(target: &mut Target<'_>, landmarks: &LandmarkSet, width: u32, height: u32) {
    let line_style = PrimitiveStyle::with_stroke(CONNECTION_COLOR, CONNECTION_STROKE);
    for (a, b) in HAND_CONNECTIONS {
        if let (Some(start), Some(end)) = (landmarks.get(*a), landmarks.get(*b)) {
            let line = Line::new(pixel_point(start, width, height), pixel_point(end, width, height));
            infallible(line.into_styled(line_style).draw(target));
        }
    }

    let marker_style = PrimitiveStyle::with_fill(LANDMARK_COLOR);
    for landmark in landmarks.points() {
        infallible(
            Circle::with_center(pixel_point(*landmark, width, height), LANDMARK_DIAMETER)
                .into_styled(marker_style)
                .draw(target),
        );
    }
}

fn draw_box(target: &mut Target<'_>, bbox: &BoundingBox, color: Rgb888, stroke: u32) {
    infallible(
        Rectangle::with_corners(
            Point::new(bbox.min_x, bbox.min_y),
            Point::new(bbox.max_x, bbox.max_y),
        )
        .into_styled(PrimitiveStyle::with_stroke(color, stroke))
        .draw(target),
    );
}

fn draw_label(target: &mut Target<'_>, text: &str, (x, y): (i32, i32), color: Rgb888) {
    let style = MonoTextStyle::new(&FONT_10X20, color);
    infallible(Text::new(text, Point::new(x, y), style).draw(target));
}

fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// 将 embedded-graphics 的绘制输出写入 RGB 帧缓冲
struct Target<'a>(&'a mut RgbImage);

impl OriginDimensions for Target<'_> {
    fn size(&self) -> Size {
        let (width, height) = self.0.dimensions();
        Size::new(width, height)
    }
}

impl DrawTarget for Target<'_> {
    type Color = Rgb888;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = self.0.dimensions();
        for Pixel(point, color) in pixels {
            if point.x >= 0
                && (point.x as u32) < width
                && point.y >= 0
                && (point.y as u32) < height
            {
                self.0.put_pixel(point.x as u32, point.y as u32, Rgb([color.r(), color.g(), color.b()]));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::overlap::analyze;
    use crate::detection::landmark::HAND_LANDMARK_COUNT;

    fn rgb(color: Rgb888) -> Rgb<u8> {
        Rgb([color.r(), color.g(), color.b()])
    }

    fn any_pixel(frame: &Frame, xs: std::ops::RangeInclusive<u32>, ys: std::ops::RangeInclusive<u32>, color: Rgb888) -> bool {
        xs.flat_map(|x| ys.clone().map(move |y| (x, y)))
            .any(|(x, y)| *frame.image.get_pixel(x, y) == rgb(color))
    }

    /// 沿对角线从 (from, from) 到 (to, to) 均匀分布的 21 个关键点
    fn diagonal_hand(from: f32, to: f32) -> LandmarkSet {
        let step = (to - from) / (HAND_LANDMARK_COUNT - 1) as f32;
        LandmarkSet::new(
            (0..HAND_LANDMARK_COUNT)
                .map(|i| {
                    let v = from + step * i as f32;
                    Landmark::new(v, v)
                })
                .collect(),
        )
    }

    #[test]
    fn test_annotate_is_pure() {
        let frame = Frame::filled(7, 100, 100, [0, 0, 0]);
        let hands = vec![(diagonal_hand(0.1, 0.4), BoundingBox::new(10, 10, 40, 40))];
        let annotated = annotate(&frame, &hands, None);

        assert_eq!(annotated.index, 7);
        assert!(frame.image.pixels().all(|p| *p == Rgb([0, 0, 0])));
        assert_ne!(annotated, frame);
    }

    #[test]
    fn test_box_and_skeleton_drawn() {
        let frame = Frame::filled(0, 100, 100, [0, 0, 0]);
        let hands = vec![(diagonal_hand(0.1, 0.4), BoundingBox::new(10, 10, 40, 40))];
        let annotated = annotate(&frame, &hands, None);

        // 左边框
        assert!(any_pixel(&annotated, 9..=11, 25..=25, BOX_COLOR));
        // 对角线中段的关键点
        assert!(any_pixel(&annotated, 23..=27, 23..=27, LANDMARK_COLOR));
        // 无重叠时不绘制重叠色
        assert!(!any_pixel(&annotated, 0..=99, 0..=99, OVERLAP_COLOR));
    }

    #[test]
    fn test_overlap_rect_and_label_drawn() {
        let frame = Frame::filled(0, 320, 240, [0, 0, 0]);
        let a = BoundingBox::new(10, 10, 30, 30);
        let b = BoundingBox::new(20, 20, 40, 40);
        let result = analyze(&a, &b, 0.05);
        assert!(result.overlapping);

        let hands = vec![
            (diagonal_hand(0.03125, 0.09375), a),
            (diagonal_hand(0.0625, 0.125), b),
        ];
        let annotated = annotate(&frame, &hands, Some(&result));

        assert!(any_pixel(&annotated, 19..=21, 25..=25, OVERLAP_COLOR));
        assert!(any_pixel(&annotated, 50..=240, 60..=85, OVERLAP_COLOR));
    }

    #[test]
    fn test_non_overlapping_result_draws_no_label() {
        let frame = Frame::filled(0, 320, 240, [0, 0, 0]);
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(200, 200, 210, 210);
        let result = analyze(&a, &b, 0.05);
        let hands = vec![
            (diagonal_hand(0.0, 0.03), a),
            (diagonal_hand(0.63, 0.65), b),
        ];
        let annotated = annotate(&frame, &hands, Some(&result));
        assert!(!any_pixel(&annotated, 50..=240, 60..=85, OVERLAP_COLOR));
    }

    #[test]
    fn test_out_of_frame_drawing_is_clipped() {
        let frame = Frame::filled(0, 16, 16, [0, 0, 0]);
        let hands = vec![(diagonal_hand(-0.5, 1.5), BoundingBox::new(-8, -8, 24, 24))];
        let annotated = annotate(&frame, &hands, None);
        assert_eq!(annotated.width(), 16);
        assert_eq!(annotated.height(), 16);
    }
}
