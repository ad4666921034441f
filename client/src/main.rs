use clap::Parser;
use client::api::{ApiError, HttpMatchmakingApi, Placement};
use client::latency::{measure_regions, HttpProbe};
use client::matchmaking::{Matchmaker, MatchmakingConfig, MatchmakingError, TcpConnector, RETRY_DELAY};
use client::network::MatchSession;
use log::{info, warn};
use std::net::TcpStream;
use std::time::Duration;

/// Deadline for each matchmaking backend request
const API_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for each latency measurement request
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the matchmaking backend
    #[arg(short = 'a', long)]
    api_endpoint: String,

    /// Candidate regions, comma separated
    #[arg(short = 'r', long, default_value = "us-east-1,us-west-2", value_delimiter = ',')]
    regions: Vec<String>,

    /// Latency probe URL, `{region}` is replaced per region
    #[arg(long, default_value = "https://dynamodb.{region}.amazonaws.com")]
    probe_url: String,

    /// Milliseconds between match status checks
    #[arg(long, default_value = "2000")]
    poll_interval_ms: u64,

    /// Status checks before giving up
    #[arg(long, default_value = "10")]
    max_polls: u32,

    /// Game server connect timeout in milliseconds
    #[arg(long, default_value = "2000")]
    connect_timeout_ms: u64,

    /// Seconds to stay in the match
    #[arg(short = 's', long, default_value = "60")]
    session_secs: u64,

    /// Matchmaking attempts before exiting, 0 keeps going forever
    #[arg(long, default_value = "0")]
    attempts: u32,
}

impl Args {
    fn matchmaking_config(&self) -> MatchmakingConfig {
        MatchmakingConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// One pass from fresh latencies to an open game server socket.
///
/// Statuses go to stdout as the machine reports them.
fn matchmake(args: &Args) -> Result<Result<(Placement, TcpStream), MatchmakingError>, ApiError> {
    let mut probe = HttpProbe::new(PROBE_TIMEOUT)?;
    let latencies = measure_regions(&mut probe, &args.regions, &args.probe_url);

    let api = HttpMatchmakingApi::new(&args.api_endpoint, API_TIMEOUT)?;
    let matchmaker = Matchmaker::new(api, TcpConnector, args.matchmaking_config(), latencies);
    Ok(matchmaker.run_blocking(|status| println!("{}", status)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Matchmaking backend: {}", args.api_endpoint);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if args.attempts > 0 && attempt > args.attempts {
            info!("Stopping after {} attempts", args.attempts);
            return Ok(());
        }

        // The blocking HTTP client must not be built or used on a runtime thread
        let attempt_args = args.clone();
        let outcome = tokio::task::spawn_blocking(move || matchmake(&attempt_args)).await??;

        let (placement, stream) = match outcome {
            Ok(joined) => joined,
            Err(e) if e.is_retryable() => {
                warn!("Attempt {} failed: {}", attempt, e);
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            Err(e) => {
                warn!("Giving up: {}", e);
                return Ok(());
            }
        };

        println!(
            "Joined {}:{} as {}",
            placement.host(),
            placement.port,
            placement.player_session_id
        );

        let mut session = MatchSession::from_std(stream, Duration::from_secs(args.session_secs))?;
        match session.run().await {
            Ok(end) => println!("{}", end),
            Err(e) => println!("Connection to server lost: {}", e),
        }

        tokio::time::sleep(RETRY_DELAY).await;
    }
}
