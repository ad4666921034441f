use clap::Parser;
use log::{info, warn};
use server::config::ServerConfig;
use server::host::LocalHost;
use server::metrics::{MetricsSink, NullMetrics, StatsdClient};
use server::network::SessionServer;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port handed to us by the hosting platform
    #[arg(short, long, default_value = "1935")]
    port: u16,

    /// Ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "5")]
    max_connections: usize,

    /// Ready players needed to start the session
    #[arg(short, long, default_value = "2")]
    ready_threshold: usize,

    /// Seconds to wait for enough ready players
    #[arg(long, default_value = "5")]
    grace_secs: u64,

    /// Address of the local statsd agent
    #[arg(long, default_value = "127.0.0.1:8125")]
    statsd: String,

    /// Do not emit metrics
    #[arg(long)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        tick_rate: args.tick_rate,
        max_connections: args.max_connections,
        ready_threshold: args.ready_threshold,
        grace_period: Duration::from_secs(args.grace_secs),
    };

    let metrics: Box<dyn MetricsSink> = if args.no_metrics {
        Box::new(NullMetrics)
    } else {
        match StatsdClient::connect(args.statsd.as_str()) {
            Ok(client) => Box::new(client),
            Err(e) => {
                warn!("Metrics disabled, statsd at {} unusable: {}", args.statsd, e);
                Box::new(NullMetrics)
            }
        }
    };

    info!(
        "Starting session server on {} ({} Hz, {} slots, {} ready to start)",
        config.bind_addr(),
        config.tick_rate,
        config.max_connections,
        config.ready_threshold
    );

    let mut server = SessionServer::bind(config, Box::new(LocalHost::new()), metrics)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    let reason = server.run(shutdown).await;
    info!("Session over: {}", reason);

    Ok(())
}
