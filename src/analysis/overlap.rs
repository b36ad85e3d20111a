// 双手重叠分析
//
// 只比较一帧中检测器返回的前两只手；三只及以上时其余手不参与比较。

use serde::Serialize;

use crate::detection::BoundingBox;

/// 默认重叠阈值，IOU 严格大于该值视为重叠
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.05;

/// 两个包围盒的比较结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntersectionResult {
    pub overlapping: bool,
    pub iou: f64,
    /// 仅在 `overlapping` 为 true 时存在
    pub overlap_rect: Option<BoundingBox>,
}

/// 计算交并比
///
/// 并集面积为 0（两个退化盒）时返回 0。
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let inter_w = (a.max_x.min(b.max_x) as i128 - a.min_x.max(b.min_x) as i128).max(0);
    let inter_h = (a.max_y.min(b.max_y) as i128 - a.min_y.max(b.min_y) as i128).max(0);
    let intersection = inter_w * inter_h;
    let union = a.area() + b.area() - intersection;

    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// 判断两个包围盒是否重叠，重叠时附带重叠区域
pub fn analyze(a: &BoundingBox, b: &BoundingBox, threshold: f64) -> IntersectionResult {
    let iou = iou(a, b);
    let overlapping = iou > threshold;
    let overlap_rect = overlapping.then(|| BoundingBox {
        min_x: a.min_x.max(b.min_x),
        min_y: a.min_y.max(b.min_y),
        max_x: a.max_x.min(b.max_x),
        max_y: a.max_y.min(b.max_y),
    });

    IntersectionResult { overlapping, iou, overlap_rect }
}

/// 对一帧的包围盒做重叠分析，不足两只手时返回 `None`
pub fn analyze_frame(boxes: &[BoundingBox], threshold: f64) -> Option<IntersectionResult> {
    match boxes {
        [first, second, ..] => Some(analyze(first, second, threshold)),
        _ => None,
    }
}
