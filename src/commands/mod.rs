// 命令模块

pub mod analyze;
pub mod config;
pub mod system;
