use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;

use gifthawk::config::{self, Config};
use gifthawk::redeem::RedeemClient;
use gifthawk::swarm::Swarm;

#[derive(Parser)]
#[command(
    name = "gifthawk",
    version,
    about = "Keeps a fleet of gateway sessions alive and redeems the gift codes they spot"
)]
struct Args {
    /// Credentials file, one token per line.
    #[arg(long, default_value = "tokens.txt")]
    tokens: PathBuf,
    /// Override the cooldown (seconds) between starting sessions.
    #[arg(long)]
    cooldown: Option<f64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gifthawk=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(cooldown) = args.cooldown {
        config.cooldown = Duration::from_secs_f64(cooldown.max(0.0));
    }

    let tokens = match config::read_credentials(&args.tokens) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("failed to read {}: {e}", args.tokens.display());
            std::process::exit(1);
        }
    };
    if tokens.is_empty() {
        eprintln!("no credentials in {}", args.tokens.display());
        std::process::exit(1);
    }

    print_banner(&config, &args.tokens, tokens.len());

    let redeemer = Arc::new(RedeemClient::new(&config.api_url, &config.redeem_token));
    let handle = Swarm::new(config, tokens, redeemer).start();

    shutdown_signal().await;
    eprintln!();
    tracing::info!("shutting down");
    let state = handle.shutdown().await;
    tracing::info!(
        "final state: {} connected, {} guilds",
        state.connected,
        state.guilds
    );
}

fn print_banner(config: &Config, tokens_path: &Path, count: usize) {
    let version = env!("CARGO_PKG_VERSION");
    let sha = env!("GIT_SHA");

    eprintln!();
    eprintln!("  \x1b[1;36mgifthawk\x1b[0m \x1b[2mv{version} ({sha})\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mgateway\x1b[0m      {}", config.gateway_url);
    eprintln!("  \x1b[2mapi\x1b[0m          {}", config.api_url);
    eprintln!(
        "  \x1b[2mtokens\x1b[0m       {count} ({})",
        tokens_path.display()
    );
    eprintln!("  \x1b[2mcooldown\x1b[0m     {:?}", config.cooldown);
    eprintln!();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
