use anyhow::{bail, Result};
use clap::Parser;
use dockwatch_core::MonitorConfig;
use dockwatch_telegram::DEFAULT_API_URL;
use std::time::Duration;

const DEFAULT_TAIL_COUNT: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "dockwatch", about = "Relays container lifecycle and log errors to a Telegram chat")]
pub struct Args {
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_token: String,
    #[arg(long, env = "TELEGRAM_CHAT_ID", allow_negative_numbers = true)]
    pub chat_id: i64,
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value_t = 60)]
    pub poll_interval_seconds: u64,
    #[arg(long, env = "TAIL_COUNT", default_value_t = 100, allow_negative_numbers = true)]
    pub tail_count: i64,
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,
    #[arg(long, env = "DOCKWATCH_FETCH_TIMEOUT_SECONDS", default_value_t = 30)]
    pub fetch_timeout_seconds: u64,
    #[arg(long, env = "TELEGRAM_API_URL", default_value = DEFAULT_API_URL)]
    pub telegram_api_url: String,
    #[arg(long, env = "DOCKWATCH_DEBUG", default_value_t = false)]
    pub debug: bool,
    #[arg(long, env = "DOCKWATCH_LOG_DIR")]
    pub log_dir: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_token: String,
    pub telegram_api_url: String,
    pub docker_host: Option<String>,
    pub debug: bool,
    pub log_dir: Option<String>,
    pub monitor: MonitorConfig,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        if args.telegram_token.trim().is_empty() {
            bail!("TELEGRAM_BOT_TOKEN is empty");
        }
        if args.chat_id == 0 {
            bail!("TELEGRAM_CHAT_ID must be a non-zero chat id");
        }
        if args.poll_interval_seconds == 0 {
            bail!("POLL_INTERVAL_SECONDS must be positive");
        }
        let tail_lines = usize::try_from(args.tail_count)
            .ok()
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_TAIL_COUNT);
        let monitor = MonitorConfig {
            poll_interval: Duration::from_secs(args.poll_interval_seconds),
            tail_lines,
            fetch_timeout: Duration::from_secs(args.fetch_timeout_seconds.max(1)),
            ..MonitorConfig::for_chat(args.chat_id)
        };
        Ok(Self {
            telegram_token: args.telegram_token.trim().to_string(),
            telegram_api_url: args.telegram_api_url,
            docker_host: args.docker_host.filter(|host| !host.trim().is_empty()),
            debug: args.debug,
            log_dir: args.log_dir.filter(|dir| !dir.trim().is_empty()),
            monitor,
        })
    }
}
