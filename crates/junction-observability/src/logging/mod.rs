//! 结构化日志模块
//!
//! 提供基于 tracing 的结构化日志功能。

use std::sync::Arc;

use parking_lot::RwLock;
use tracing_subscriber::{
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::{Config, LoggingConfig};
use crate::error::{ObservabilityError, Result};

/// 日志级别重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

/// 日志管理器
#[derive(Debug)]
pub struct LogManager {
    /// 配置
    config: LoggingConfig,

    /// 过滤器重新加载句柄
    reload_handle: Option<Arc<RwLock<ReloadHandle>>>,

    /// 是否已初始化
    initialized: bool,
}

impl LogManager {
    /// 创建新的日志管理器并安装全局 subscriber
    pub async fn new(config: &Config) -> Result<Self> {
        let mut manager = Self {
            config: config.logging.clone(),
            reload_handle: None,
            initialized: false,
        };

        manager.init().await?;

        Ok(manager)
    }

    /// 初始化日志系统
    async fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let filter = build_filter(&self.config)?;
        let (filter, reload_handle) = reload::Layer::new(filter);
        let registry = tracing_subscriber::registry().with(filter);

        // 全局 subscriber 只能安装一次；重复安装视为错误而不是 panic
        let installed = if self.config.json_format {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(self.config.include_target)
                .with_thread_ids(self.config.include_thread_id)
                .with_line_number(self.config.include_line_number)
                .with_ansi(false);
            registry.with(layer).try_init()
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(self.config.include_target)
                .with_thread_ids(self.config.include_thread_id)
                .with_line_number(self.config.include_line_number)
                .with_ansi(self.config.ansi_colors);
            registry.with(layer).try_init()
        };

        installed.map_err(|e| {
            ObservabilityError::logging(format!("Failed to install subscriber: {}", e))
        })?;

        self.reload_handle = Some(Arc::new(RwLock::new(reload_handle)));
        self.initialized = true;

        tracing::info!(
            target: "junction_observability",
            "Log manager initialized with level: {}",
            self.config.level
        );

        Ok(())
    }

    /// 动态更新日志级别
    pub async fn update_level(&mut self, level: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(level)
            .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

        let handle = self
            .reload_handle
            .as_ref()
            .ok_or_else(|| ObservabilityError::logging("Log manager not initialized"))?;

        handle
            .write()
            .modify(|filter| *filter = new_filter)
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;

        self.config.level = level.to_string();

        tracing::info!(
            target: "junction_observability",
            "Log level updated to: {}",
            level
        );

        Ok(())
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// 是否已安装
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// 构建环境过滤器
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

    // 添加模块级别的过滤器
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level)
            .parse()
            .map_err(|e| ObservabilityError::logging(format!("Invalid directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

/// 创建 realm 上下文的 span
pub fn create_realm_span(realm: &str) -> tracing::Span {
    tracing::info_span!("realm", realm = %realm)
}

/// 创建会话上下文的 span
pub fn create_session_span(session_id: u64, realm: Option<&str>) -> tracing::Span {
    if let Some(realm) = realm {
        tracing::info_span!(
            "session",
            session_id = session_id,
            realm = %realm,
        )
    } else {
        tracing::info_span!("session", session_id = session_id)
    }
}

/// 创建连接上下文的 span
pub fn create_connection_span(peer: &str) -> tracing::Span {
    tracing::info_span!("connection", peer = %peer)
}
