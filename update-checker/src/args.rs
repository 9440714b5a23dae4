use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Watches release sources and announces new versions")]
pub struct CheckerArgs {
    #[arg(short, long, default_value = "saved.db", env = "UPDATE_CHECKER_DB")]
    pub database: PathBuf,

    /// Request timeout in seconds.
    #[arg(long, default_value = "20", env = "UPDATE_CHECKER_TIMEOUT")]
    pub timeout: u64,

    #[arg(long, env = "UPDATE_CHECKER_PROXY")]
    pub proxy: Option<Url>,

    /// Probed through the proxy before the first cycle.
    #[arg(long, default_value = "https://www.google.com", env = "UPDATE_CHECKER_PROXY_PROBE_URL")]
    pub proxy_probe_url: String,

    /// Minutes between two cycles.
    #[arg(long, default_value = "360", env = "UPDATE_CHECKER_INTERVAL")]
    pub interval: u64,

    #[arg(long, default_value_t = false, env = "UPDATE_CHECKER_PARALLEL")]
    pub parallel: bool,

    #[arg(long, default_value = "8", env = "UPDATE_CHECKER_WORKERS")]
    pub workers: NonZeroUsize,

    /// Seconds to wait between two checks in sequential mode.
    #[arg(long, default_value = "2", env = "UPDATE_CHECKER_ITEM_DELAY")]
    pub item_delay: u64,

    #[arg(long, default_value = "5")]
    pub consecutive_failure_limit: NonZeroUsize,

    #[arg(long, default_value = "10")]
    pub cumulative_failure_limit: NonZeroUsize,

    #[arg(long, default_value = "10")]
    pub notify_attempts: NonZeroUsize,

    #[arg(long, env = "UPDATE_CHECKER_TELEGRAM_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,

    /// Chat or channel that receives update messages.
    #[arg(long, env = "UPDATE_CHECKER_TELEGRAM_CHAT")]
    pub telegram_chat: Option<String>,

    /// Treat every successful check as an update.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Never send notifications.
    #[arg(long, default_value_t = false)]
    pub dont_post: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check everything, then repeat after the interval.
    Run,
    /// Run a single cycle and exit.
    Cycle,
    /// Check one source, bypassing the request cache.
    Check { id: String },
    /// Print the saved versions as a table.
    Show,
    /// Print all saved records as JSON.
    Json,
    /// List the registered sources.
    List,
}
