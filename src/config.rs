use std::io;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?encoding=json&v=9";
pub const DEFAULT_API_URL: &str = "https://discordapp.com/api/v9";

#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway endpoint every session dials first.
    pub gateway_url: String,
    /// Base URL of the HTTP API used for redemption.
    pub api_url: String,
    /// Token of the account that redeems spotted codes.
    pub redeem_token: String,
    /// Pause between starting successive sessions, so a burst of identifies
    /// does not trip the gateway rate limit.
    pub cooldown: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let redeem_token = std::env::var("GIFTHAWK_TOKEN")
            .expect("GIFTHAWK_TOKEN is required (token of the redeeming account)");

        let cooldown = std::env::var("GIFTHAWK_COOLDOWN")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(1.0);

        Self {
            gateway_url: std::env::var("GIFTHAWK_GATEWAY_URL")
                .unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string()),
            api_url: std::env::var("GIFTHAWK_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            redeem_token,
            cooldown: Duration::from_secs_f64(cooldown.max(0.0)),
        }
    }
}

/// Read credentials from a plain text file, one token per line. Blank lines
/// and `#` comments are skipped.
pub fn read_credentials(path: &Path) -> io::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}
