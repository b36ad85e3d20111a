// 手部检测模块
//
// 子模块：
// - landmark: 21 点手部关键点与骨架连线
// - bbox: 关键点 -> 像素包围盒
// - detector: 检测器 trait 与外部 hand-landmarker 进程实现

pub mod bbox;
pub mod detector;
pub mod landmark;

pub use bbox::BoundingBox;
pub use detector::{LandmarkDetector, ProcessLandmarkDetector};
pub use landmark::LandmarkSet;
