// 分析统计累加器

use serde::{Deserialize, Serialize};

use super::overlap::IntersectionResult;

/// 单次任务的汇总统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// 成功读取的帧数
    pub total_frames: u64,
    /// 双手重叠的帧数
    pub intersection_frames: u64,
    /// 单帧中检测到的最多手数
    pub max_hands_detected: usize,
}

/// 逐帧更新的统计状态，`finish` 后只读
#[derive(Debug, Default)]
pub struct AnalysisAccumulator {
    summary: AnalysisSummary,
}

impl AnalysisAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每读取一帧调用一次
    pub fn update(&mut self, hands: usize, intersection: Option<&IntersectionResult>) {
        self.summary.total_frames += 1;
        self.summary.max_hands_detected = self.summary.max_hands_detected.max(hands);
        if intersection.map_or(false, |r| r.overlapping) {
            self.summary.intersection_frames += 1;
        }
    }

    pub fn finish(self) -> AnalysisSummary {
        self.summary
    }
}
