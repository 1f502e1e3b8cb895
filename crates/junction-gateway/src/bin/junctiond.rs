use clap::Parser;
use junction_gateway::{Gateway, GatewayConfig};
use junction_observability::{Config, Observability};
use junction_router::{RealmConfig, Router, RouterConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "junctiond")]
#[command(about = "Junction WebSocket router")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "JUNCTION_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Maximum number of concurrent connections
    #[arg(long, default_value_t = 1000)]
    max_connections: usize,

    /// Capacity of each connection's outbound queue
    #[arg(long, default_value_t = 256)]
    outbound_queue_size: usize,

    /// Realm to create at startup (repeatable)
    #[arg(long = "realm")]
    realms: Vec<String>,

    /// Refuse HELLOs for realms that were not created at startup
    #[arg(long, default_value = "false")]
    no_auto_create: bool,

    /// Log level (overrides JUNCTION_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, default_value = "false")]
    log_json: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "JUNCTION_METRICS_LISTEN")]
    metrics_listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut observability_config = Config::from_env();
    if let Some(level) = &cli.log_level {
        observability_config = observability_config.with_log_level(level.clone());
    }
    if cli.log_json {
        observability_config = observability_config.with_json_format(true);
    }
    if let Some(addr) = &cli.metrics_listen {
        observability_config = observability_config.with_metrics_listen(addr.clone());
    }
    let _observability = Observability::init(observability_config).await?;

    let mut router_config = RouterConfig::default().with_auto_create(!cli.no_auto_create);
    for realm in &cli.realms {
        // anonymous sessions get full access on command line realms
        router_config = router_config
            .with_realm(RealmConfig::new(realm.clone()).with_anonymous_role("trusted"));
    }
    let router = Router::from_config(router_config)?;

    let gateway = Gateway::new(
        GatewayConfig {
            bind: cli.bind,
            max_connections: cli.max_connections,
            outbound_queue_size: cli.outbound_queue_size,
        },
        router,
    );

    let stopper = gateway.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            stopper.shutdown();
        }
    });

    gateway.run().await?;
    Ok(())
}
