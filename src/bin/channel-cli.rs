use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use live_channel::channel::cache::PollCache;
use live_channel::channel::FallbackPoller;
use live_channel::config::loader::{load_config, load_from_env};
use live_channel::config::ChannelConfig;
use live_channel::observability::logging;
use live_channel::resilience::{BackoffPolicy, CircuitBreaker, OperationClass, RetryExecutor};
use live_channel::telemetry::TelemetryHandle;
use live_channel::transport::HttpPollTransport;

#[derive(Parser)]
#[command(name = "channel-cli")]
#[command(about = "Operator tool for live-channel configurations", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults plus environment overrides when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the effective values
    Check,
    /// Print the reconnect and retry delay schedules
    Schedule,
    /// Fetch one snapshot from the poll endpoint
    Poll {
        /// Override the configured poll URL
        #[arg(short, long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path),
        None => load_from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    logging::init_logging(&config.observability);

    match cli.command {
        Commands::Check => {
            println!("Configuration OK");
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Schedule => print_schedules(&config),
        Commands::Poll { url } => {
            let url = url.unwrap_or_else(|| config.connection.poll_url.clone());
            poll_once(&config, &url).await?;
        }
    }

    Ok(())
}

fn print_schedules(config: &ChannelConfig) {
    let conn = &config.connection;
    let reconnect = BackoffPolicy::new(
        Duration::from_millis(conn.reconnect_delay_ms),
        conn.reconnect_backoff_factor,
    )
    .with_max_delay(Duration::from_millis(conn.max_reconnect_delay_ms));

    println!("Reconnect delays ({} attempts, then error state):", conn.max_reconnect_attempts);
    for (attempt, delay) in reconnect.schedule(conn.max_reconnect_attempts).iter().enumerate() {
        println!("  #{:<3} {:?}", attempt + 1, delay);
    }

    let retry = RetryExecutor::from_config(&config.retries);
    println!(
        "Retry waits per call ({} attempts, jitter ±{:.0}%):",
        retry.max_attempts(),
        config.retries.jitter * 100.0
    );
    for (attempt, delay) in retry.policy().schedule(retry.max_attempts().saturating_sub(1)).iter().enumerate() {
        println!("  after #{:<3} {:?}", attempt + 1, delay);
    }
}

async fn poll_once(config: &ChannelConfig, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let transport = HttpPollTransport::new(url, Duration::from_millis(config.connection.request_timeout_ms))?;
    let breaker = CircuitBreaker::new(
        OperationClass::PollFetch,
        config.circuit.threshold,
        Duration::from_millis(config.circuit.reset_timeout_ms),
    );
    let (poller, _outcomes) = FallbackPoller::new(
        Arc::new(transport),
        RetryExecutor::from_config(&config.retries),
        breaker,
        Arc::new(PollCache::new()),
        TelemetryHandle::detached(),
        None,
    );

    match poller.poll_once().await {
        Some(Ok(snapshot)) => println!("{}", serde_json::to_string_pretty(&snapshot.payload)?),
        Some(Err(failure)) => {
            eprintln!("Error: {}", failure.message);
            std::process::exit(1);
        }
        None => eprintln!("A poll is already in flight"),
    }
    Ok(())
}
