// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Credit Watcher
//!
//! Entry point for the `nova-credit-watch` binary. Parses CLI arguments,
//! initializes logging and metrics, wires a credit feed and a reserve
//! monitor to the ledger, and serves what they see over HTTP.
//!
//! The binary supports four subcommands:
//!
//! - `watch`   : follow a subject's credit line and the pool's exchange rate
//! - `rate`    : read the reserve once and print the price per share
//! - `credit`  : read a subject's credit line once and print it
//! - `version` : print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;

use nova_credit_sync::config::SCALE;
use nova_credit_sync::exchange::{shares_to_assets, withdrawable_assets};
use nova_credit_sync::format::{format_amount, format_fixed9, UNKNOWN};
use nova_credit_sync::sync::{CacheKey, Scheduler, Subject};
use nova_credit_sync::{
    CreditFeed, CreditStateStore, CreditView, LedgerCreditSource, RateView, RefreshBus, ReserveMonitor,
    TokioScheduler, ViewClient,
};

use cli::{Commands, NovaWatchCli};
use logging::LogFormat;
use metrics::{NodeMetrics, SharedMetrics};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NovaWatchCli::parse();

    match cli.command {
        Commands::Watch(args) => run_watch(args).await,
        Commands::Rate(args) => query_rate(args).await,
        Commands::Credit(args) => query_credit(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Follows the configured subject and the pool rate until a shutdown
/// signal arrives.
async fn run_watch(args: cli::WatchArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_DIRECTIVES,
        LogFormat::from_str_lossy(&args.market.log_format),
    );

    let market = args.market.market();
    let sync_config = args.sync_config();
    if sync_config.cache_ttl >= sync_config.poll_interval {
        tracing::warn!(
            cache_ttl_secs = sync_config.cache_ttl.as_secs(),
            poll_secs = sync_config.poll_interval.as_secs(),
            "cache TTL is not shorter than the poll interval; steady polls will be served from cache"
        );
    }

    tracing::info!(
        endpoint = %market.endpoint,
        module = %market.module,
        asset = %market.asset_type,
        subject = args.subject.as_deref().unwrap_or("-"),
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        "starting nova-credit-watch"
    );

    // --- Ledger access ---
    let client = Arc::new(
        ViewClient::new(&market.endpoint)
            .with_context(|| format!("failed to build view client for {}", market.endpoint))?,
    );
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::current());

    // --- Credit state ---
    let source = Arc::new(LedgerCreditSource::new(client.clone(), &market));
    let store = CreditStateStore::new(source, sync_config);
    let bus = RefreshBus::new();
    let feed = Arc::new(CreditFeed::new(store.clone(), &market, scheduler.clone()));
    feed.attach_bus(&bus);

    // --- Exchange rate ---
    let monitor = ReserveMonitor::new(client, &market, args.rate_config(), scheduler);

    // --- Metrics ---
    let node_metrics: SharedMetrics =
        Arc::new(NodeMetrics::new().context("failed to create prometheus registry")?);

    // --- Observers ---
    let subject_key = args
        .subject
        .as_deref()
        .and_then(Subject::parse)
        .map(|subject| CacheKey::new(subject, &market.asset_type));
    let credit_observer = tokio::spawn(observe_credit(
        feed.subscribe(),
        store.clone(),
        subject_key,
        market.decimals,
        Arc::clone(&node_metrics),
    ));
    let rate_observer = tokio::spawn(observe_rate(monitor.subscribe(), Arc::clone(&node_metrics)));

    // --- Start polling ---
    monitor.start();
    let initial_read = {
        let feed = Arc::clone(&feed);
        let subject = args.subject.clone();
        tokio::spawn(async move { feed.read(subject.as_deref()).await })
    };

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        credit: feed.subscribe(),
        rate: monitor.subscribe(),
        bus,
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("status API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    monitor.stop();
    initial_read.abort();
    credit_observer.abort();
    rate_observer.abort();
    tracing::info!("nova-credit-watch stopped");
    Ok(())
}

/// Logs every credit view change and mirrors it into metrics.
async fn observe_credit(
    mut rx: watch::Receiver<CreditView>,
    store: CreditStateStore,
    key: Option<CacheKey>,
    decimals: u8,
    metrics: SharedMetrics,
) {
    while rx.changed().await.is_ok() {
        let view = rx.borrow_and_update().clone();
        tracing::info!(
            subject = view.subject.as_deref().unwrap_or("-"),
            limit = %view.limit_display,
            usage = %view.usage_display,
            available = %view.available_display,
            score = view.score.map(i64::from).unwrap_or(-1),
            loading = view.loading,
            stale = view.stale,
            failed = view.last_fetch_failed,
            "credit view updated"
        );

        metrics.observe_credit(&view, decimals);
        let failures = key
            .as_ref()
            .and_then(|k| store.status(k))
            .map(|status| status.consecutive_failures);
        metrics.observe_store(store.stats(), failures);
    }
}

/// Logs every rate view change and mirrors it into metrics.
async fn observe_rate(mut rx: watch::Receiver<RateView>, metrics: SharedMetrics) {
    while rx.changed().await.is_ok() {
        let view = rx.borrow_and_update().clone();
        tracing::info!(
            pps = %view.pps_display,
            apr = %view.apr_display,
            apy = %view.apy_display,
            stale = view.stale,
            failed = view.last_poll_failed,
            "rate view updated"
        );
        metrics.observe_rate(&view);
    }
}

/// One reserve read, printed to stdout.
async fn query_rate(args: cli::RateArgs) -> Result<()> {
    logging::init_logging("warn", LogFormat::from_str_lossy(&args.market.log_format));

    let market = args.market.market();
    let client = Arc::new(ViewClient::new(&market.endpoint).context("failed to build view client")?);
    let monitor = ReserveMonitor::new(
        client,
        &market,
        Default::default(),
        Arc::new(TokioScheduler::current()),
    );

    let pps = monitor
        .poll_once()
        .await
        .with_context(|| format!("failed to read reserve state from {}", market.endpoint))?;

    println!("Price per share : {}", if pps == 0 { UNKNOWN.to_string() } else { format_fixed9(pps) });
    if let (Some(shares), Some(snapshot)) = (args.shares, monitor.last_snapshot()) {
        let assets = shares_to_assets(shares, pps, SCALE).context("share conversion overflowed")?;
        let withdrawable = withdrawable_assets(shares, &snapshot).context("share conversion overflowed")?;
        println!("Shares          : {}", shares);
        println!("Asset value     : {}", format_amount(assets, market.decimals));
        println!("Withdrawable    : {}", format_amount(withdrawable, market.decimals));
    }
    Ok(())
}

/// One credit read, printed to stdout.
async fn query_credit(args: cli::CreditArgs) -> Result<()> {
    logging::init_logging("warn", LogFormat::from_str_lossy(&args.market.log_format));

    let market = args.market.market();
    let subject = Subject::parse(&args.subject).context("subject must not be blank")?;
    let client = Arc::new(ViewClient::new(&market.endpoint).context("failed to build view client")?);
    let store = CreditStateStore::new(
        Arc::new(LedgerCreditSource::new(client, &market)),
        Default::default(),
    );

    let key = CacheKey::new(subject.clone(), &market.asset_type);
    let snapshot = store
        .read(&key)
        .await
        .with_context(|| format!("failed to read credit state for {}", subject))?;

    let mut view = CreditView::bound(&subject);
    view.apply(&snapshot, market.decimals);
    println!("Subject   : {}", subject);
    println!("Limit     : {}", view.limit_display);
    println!("Usage     : {}", view.usage_display);
    println!("Available : {}", view.available_display);
    println!(
        "Score     : {}",
        view.score.map_or_else(|| UNKNOWN.to_string(), |s| s.to_string())
    );
    if snapshot.partial {
        println!("Note      : some credit views could not be read");
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("nova-credit-watch {}", env!("CARGO_PKG_VERSION"));
    println!("rustc             {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
