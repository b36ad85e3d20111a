// 配置命令

use crate::config::{self, AppConfig};
use crate::error::AppResult;
use tracing::info;

/// 获取当前生效的配置
pub async fn get_config() -> AppResult<AppConfig> {
    Ok(config::get_config())
}

/// 恢复默认配置并写回配置文件
pub async fn reset_config() -> AppResult<AppConfig> {
    let defaults = AppConfig::default();
    config::update_config(defaults.clone())?;
    info!("[CONFIG] 已恢复默认配置");
    Ok(defaults)
}
