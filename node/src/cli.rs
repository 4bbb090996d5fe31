//! # CLI Interface
//!
//! Defines the command-line argument structure for `nova-credit-watch`
//! using `clap` derive. Supports four subcommands: `watch`, `rate`,
//! `credit`, and `version`. Every flag can also come from a `NOVA_*`
//! environment variable.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use nova_credit_sync::config::{MarketConfig, RateConfig, SyncConfig};

/// NOVA lending market watcher.
///
/// Keeps a subject's credit line and the pool's exchange rate in sync with
/// the ledger, and serves both over a small HTTP status API with Prometheus
/// metrics alongside.
#[derive(Parser, Debug)]
#[command(
    name = "nova-credit-watch",
    about = "NOVA lending market credit and exchange-rate watcher",
    version,
    propagate_version = true
)]
pub struct NovaWatchCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Keep credit state and the exchange rate in sync and serve them.
    Watch(WatchArgs),
    /// Read the reserve once and print the price per share.
    Rate(RateArgs),
    /// Read a subject's credit line once and print it.
    Credit(CreditArgs),
    /// Print version information and exit.
    Version,
}

/// Where the market lives. Shared by every subcommand that talks to the
/// ledger.
#[derive(Args, Debug, Clone)]
pub struct MarketArgs {
    /// Base URL of the ledger node's REST API.
    #[arg(long, env = "NOVA_RPC_URL", default_value = "http://127.0.0.1:8080/v1")]
    pub rpc_url: String,

    /// Module hosting the market's view functions (`address::module`).
    #[arg(long, env = "NOVA_MODULE")]
    pub module: String,

    /// Fully-qualified asset type of the market.
    #[arg(long, env = "NOVA_ASSET_TYPE")]
    pub asset_type: String,

    /// Decimal precision of the asset.
    #[arg(long, env = "NOVA_ASSET_DECIMALS", default_value_t = 6)]
    pub asset_decimals: u8,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "NOVA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl MarketArgs {
    pub fn market(&self) -> MarketConfig {
        MarketConfig::new(&self.rpc_url, &self.module, &self.asset_type, self.asset_decimals)
    }
}

/// Arguments for the `watch` subcommand.
#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub market: MarketArgs,

    /// Account to follow. Without one the credit view stays empty and only
    /// the exchange rate is tracked.
    #[arg(long, env = "NOVA_SUBJECT")]
    pub subject: Option<String>,

    /// Port for the status API.
    #[arg(long, env = "NOVA_API_PORT", default_value_t = 9741)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "NOVA_METRICS_PORT", default_value_t = 9742)]
    pub metrics_port: u16,

    /// Seconds between credit polls after a successful read.
    #[arg(long, env = "NOVA_POLL_SECS", default_value_t = 15)]
    pub poll_secs: u64,

    /// Seconds a credit read stays cached.
    #[arg(long, env = "NOVA_CACHE_TTL_SECS", default_value_t = 10)]
    pub cache_ttl_secs: u64,

    /// Seconds between reserve polls.
    #[arg(long, env = "NOVA_RATE_POLL_SECS", default_value_t = 30)]
    pub rate_poll_secs: u64,
}

impl WatchArgs {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(self.poll_secs.max(1)),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            ..SyncConfig::default()
        }
    }

    pub fn rate_config(&self) -> RateConfig {
        RateConfig {
            poll_interval: Duration::from_secs(self.rate_poll_secs.max(1)),
            ..RateConfig::default()
        }
    }
}

/// Arguments for the `rate` subcommand.
#[derive(Args, Debug)]
pub struct RateArgs {
    #[command(flatten)]
    pub market: MarketArgs,

    /// Also convert this many shares (raw units) into assets.
    #[arg(long)]
    pub shares: Option<u128>,
}

/// Arguments for the `credit` subcommand.
#[derive(Args, Debug)]
pub struct CreditArgs {
    #[command(flatten)]
    pub market: MarketArgs,

    /// Account to read.
    #[arg(long, env = "NOVA_SUBJECT")]
    pub subject: String,
}
