//! Junction Observability Infrastructure
//!
//! 提供统一的日志与指标功能。

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use error::{ObservabilityError, Result};
pub use logging::LogManager;
pub use metrics::{MetricsCollector, RealmMetrics};

use parking_lot::RwLock;
use std::sync::Arc;

/// 统一的观测性句柄
#[derive(Debug)]
pub struct Observability {
    /// 日志管理器
    log_manager: Arc<RwLock<LogManager>>,
    /// 指标收集器
    metrics: Arc<MetricsCollector>,
    /// 配置
    config: Config,
}

impl Observability {
    /// 初始化观测性基础设施
    pub async fn init(config: Config) -> Result<Self> {
        let log_manager = Arc::new(RwLock::new(LogManager::new(&config).await?));
        let metrics = Arc::new(MetricsCollector::new(&config).await?);

        tracing::info!(
            target: "junction_observability",
            "Observability infrastructure initialized"
        );

        Ok(Self {
            log_manager,
            metrics,
            config,
        })
    }

    /// 获取日志管理器
    pub fn log_manager(&self) -> Arc<RwLock<LogManager>> {
        Arc::clone(&self.log_manager)
    }

    /// 获取指标收集器
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// 获取配置
    pub fn config(&self) -> &Config {
        &self.config
    }
}
