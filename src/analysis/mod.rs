// 重叠分析模块
//
// - overlap: IOU 计算与阈值判断
// - accumulator: 逐帧统计

pub mod accumulator;
pub mod overlap;

pub use accumulator::{AnalysisAccumulator, AnalysisSummary};
pub use overlap::{analyze_frame, IntersectionResult};
