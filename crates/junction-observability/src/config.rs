//! 配置管理模块
//!
//! 观测性配置。由上层（路由器宿主进程）构造后传入，这里不解析配置文件。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 观测性配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 指标配置
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 识别 `JUNCTION_LOG`、`JUNCTION_LOG_JSON` 与 `JUNCTION_METRICS_LISTEN`，
    /// 其余保持默认值。
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("JUNCTION_LOG") {
            config.logging.level = level;
        }
        if let Ok(json) = std::env::var("JUNCTION_LOG_JSON") {
            config.logging.json_format = matches!(json.as_str(), "1" | "true" | "yes");
        }
        if let Ok(addr) = std::env::var("JUNCTION_METRICS_LISTEN") {
            config.metrics.listen_addr = Some(addr);
        }
        config
    }

    /// 设置日志级别
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    /// 设置是否使用 JSON 格式
    pub fn with_json_format(mut self, json: bool) -> Self {
        self.logging.json_format = json;
        self
    }

    /// 添加模块特定的日志级别
    pub fn with_module_level(mut self, module: impl Into<String>, level: impl Into<String>) -> Self {
        self.logging.module_levels.insert(module.into(), level.into());
        self
    }

    /// 启用或关闭指标
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics.enabled = enabled;
        self
    }

    /// 设置 Prometheus 抓取地址
    pub fn with_metrics_listen(mut self, addr: impl Into<String>) -> Self {
        self.metrics.listen_addr = Some(addr.into());
        self
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（trace, debug, info, warn, error）
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否使用 JSON 格式
    #[serde(default = "default_false")]
    pub json_format: bool,

    /// 模块级别的日志配置
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// 是否启用 ANSI 颜色
    #[serde(default = "default_true")]
    pub ansi_colors: bool,

    /// 是否包含目标（target）
    #[serde(default = "default_true")]
    pub include_target: bool,

    /// 是否包含线程 ID
    #[serde(default = "default_false")]
    pub include_thread_id: bool,

    /// 是否包含行号
    #[serde(default = "default_true")]
    pub include_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            module_levels: HashMap::new(),
            ansi_colors: true,
            include_target: true,
            include_thread_id: false,
            include_line_number: true,
        }
    }
}

/// 指标配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// 是否启用指标收集
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 是否启用 Prometheus 导出器
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,

    /// Prometheus HTTP 抓取地址（如 "0.0.0.0:9100"），为空时不监听
    #[serde(default)]
    pub listen_addr: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus_enabled: true,
            listen_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_builder() {
        let config = Config::default()
            .with_log_level("debug")
            .with_json_format(true)
            .with_module_level("junction_router", "trace");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(
            config.logging.module_levels.get("junction_router").map(String::as_str),
            Some("trace")
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: Config =
            serde_json::from_str(r#"{"logging": {"level": "warn"}}"#).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.include_line_number);
        assert!(config.metrics.prometheus_enabled);
        assert!(config.metrics.listen_addr.is_none());
    }

    #[test]
    fn test_metrics_listen() {
        let config = Config::default().with_metrics_listen("127.0.0.1:9100");
        assert_eq!(config.metrics.listen_addr.as_deref(), Some("127.0.0.1:9100"));

        let parsed: Config =
            serde_json::from_str(r#"{"metrics": {"listen_addr": "0.0.0.0:9100"}}"#).unwrap();
        assert_eq!(parsed.metrics.listen_addr.as_deref(), Some("0.0.0.0:9100"));
        assert!(parsed.metrics.enabled);
    }
}
