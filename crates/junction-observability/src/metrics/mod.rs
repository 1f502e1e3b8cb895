//! 指标收集模块
//!
//! 提供基于 metrics 库的指标收集功能。指标名称在这里集中定义，
//! 路由器通过 `RealmMetrics` 记录。

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "prometheus")]
use std::net::SocketAddr;

use crate::config::{Config, MetricsConfig};
use crate::error::Result;
#[cfg(feature = "prometheus")]
use crate::error::ObservabilityError;

/// 活跃 realm 数
pub const REALMS_ACTIVE: &str = "junction_realms_active";
/// 活跃会话数
pub const SESSIONS_ACTIVE: &str = "junction_sessions_active";
/// 会话加入总数
pub const SESSIONS_JOINED_TOTAL: &str = "junction_sessions_joined_total";
/// 发布总数
pub const PUBLICATIONS_TOTAL: &str = "junction_publications_total";
/// 投递事件总数
pub const EVENTS_DELIVERED_TOTAL: &str = "junction_events_delivered_total";
/// 调用总数
pub const CALLS_TOTAL: &str = "junction_calls_total";
/// 调用超时总数
pub const CALL_TIMEOUTS_TOTAL: &str = "junction_call_timeouts_total";
/// 调用耗时
pub const CALL_DURATION_SECONDS: &str = "junction_call_duration_seconds";
/// 投递失败总数
pub const DELIVERY_FAILURES_TOTAL: &str = "junction_delivery_failures_total";
/// 协议违规总数
pub const PROTOCOL_VIOLATIONS_TOTAL: &str = "junction_protocol_violations_total";

/// 指标收集器
pub struct MetricsCollector {
    /// Prometheus 句柄
    #[cfg(feature = "prometheus")]
    handle: Option<PrometheusHandle>,

    /// 配置
    config: MetricsConfig,

    /// 是否已初始化
    initialized: bool,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("config", &self.config)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl MetricsCollector {
    /// 创建新的指标收集器
    pub async fn new(config: &Config) -> Result<Self> {
        let mut collector = Self {
            #[cfg(feature = "prometheus")]
            handle: None,
            config: config.metrics.clone(),
            initialized: false,
        };

        collector.init().await?;

        Ok(collector)
    }

    /// 初始化指标收集器
    async fn init(&mut self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        #[cfg(feature = "prometheus")]
        if self.config.prometheus_enabled {
            let recorder = match &self.config.listen_addr {
                Some(addr) => {
                    let addr: SocketAddr = addr.parse().map_err(|e| {
                        ObservabilityError::config(format!("Invalid metrics address {}: {}", addr, e))
                    })?;
                    let (recorder, exporter) = PrometheusBuilder::new()
                        .with_http_listener(addr)
                        .build()
                        .map_err(|e| {
                            ObservabilityError::metrics(format!("Failed to build exporter: {}", e))
                        })?;
                    tokio::spawn(async move {
                        // ExporterError implements neither Debug nor Display in 0.15.
                        if let Err(_e) = exporter.await {
                            tracing::error!(
                                target: "junction_observability",
                                "Prometheus exporter stopped with an error"
                            );
                        }
                    });
                    tracing::info!(
                        target: "junction_observability",
                        "Serving metrics on http://{}/metrics",
                        addr
                    );
                    recorder
                }
                None => PrometheusBuilder::new().build_recorder(),
            };
            let handle = recorder.handle();

            metrics::set_global_recorder(recorder).map_err(|e| {
                ObservabilityError::metrics(format!("Failed to set global recorder: {}", e))
            })?;

            self.handle = Some(handle);
        }

        register_descriptions();
        self.initialized = true;

        tracing::info!(
            target: "junction_observability",
            "Metrics collector initialized"
        );

        Ok(())
    }

    /// 是否已初始化
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// 获取 Prometheus 格式的指标
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// 注册指标描述
pub fn register_descriptions() {
    describe_gauge!(REALMS_ACTIVE, Unit::Count, "Number of live realms");
    describe_gauge!(SESSIONS_ACTIVE, Unit::Count, "Number of attached sessions");
    describe_counter!(
        SESSIONS_JOINED_TOTAL,
        Unit::Count,
        "Total number of sessions that joined a realm"
    );
    describe_counter!(
        PUBLICATIONS_TOTAL,
        Unit::Count,
        "Total number of accepted publications"
    );
    describe_counter!(
        EVENTS_DELIVERED_TOTAL,
        Unit::Count,
        "Total number of events handed to transports"
    );
    describe_counter!(CALLS_TOTAL, Unit::Count, "Total number of routed calls");
    describe_counter!(
        CALL_TIMEOUTS_TOTAL,
        Unit::Count,
        "Total number of calls that hit their deadline"
    );
    describe_histogram!(
        CALL_DURATION_SECONDS,
        Unit::Seconds,
        "Time from invocation to final result"
    );
    describe_counter!(
        DELIVERY_FAILURES_TOTAL,
        Unit::Count,
        "Total number of failed transport sends"
    );
    describe_counter!(
        PROTOCOL_VIOLATIONS_TOTAL,
        Unit::Count,
        "Total number of sessions aborted for protocol violations"
    );
}

/// Realm 指标记录器
pub struct RealmMetrics;

impl RealmMetrics {
    /// 记录 realm 创建
    pub fn realm_created() {
        metrics::gauge!(REALMS_ACTIVE).increment(1.0);
    }

    /// 记录 realm 销毁
    pub fn realm_destroyed() {
        metrics::gauge!(REALMS_ACTIVE).decrement(1.0);
    }

    /// 记录会话加入
    pub fn session_joined(realm: &str) {
        metrics::counter!(SESSIONS_JOINED_TOTAL, "realm" => realm.to_string()).increment(1);
        metrics::gauge!(SESSIONS_ACTIVE, "realm" => realm.to_string()).increment(1.0);
    }

    /// 记录会话离开
    pub fn session_left(realm: &str) {
        metrics::gauge!(SESSIONS_ACTIVE, "realm" => realm.to_string()).decrement(1.0);
    }

    /// 记录发布
    pub fn publication(realm: &str, recipients: usize) {
        metrics::counter!(PUBLICATIONS_TOTAL, "realm" => realm.to_string()).increment(1);
        metrics::counter!(EVENTS_DELIVERED_TOTAL, "realm" => realm.to_string())
            .increment(recipients as u64);
    }

    /// 记录调用
    pub fn call(realm: &str) {
        metrics::counter!(CALLS_TOTAL, "realm" => realm.to_string()).increment(1);
    }

    /// 记录调用完成耗时
    pub fn call_completed(realm: &str, duration_secs: f64) {
        metrics::histogram!(CALL_DURATION_SECONDS, "realm" => realm.to_string())
            .record(duration_secs);
    }

    /// 记录调用超时
    pub fn call_timeout(realm: &str) {
        metrics::counter!(CALL_TIMEOUTS_TOTAL, "realm" => realm.to_string()).increment(1);
    }

    /// 记录投递失败
    pub fn delivery_failure(realm: &str) {
        metrics::counter!(DELIVERY_FAILURES_TOTAL, "realm" => realm.to_string()).increment(1);
    }

    /// 记录协议违规
    pub fn protocol_violation() {
        metrics::counter!(PROTOCOL_VIOLATIONS_TOTAL).increment(1);
    }
}
