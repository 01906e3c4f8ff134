//! Faucet service binary

use clap::Parser;
use monero_faucet::logging::init_logging;
use monero_faucet::{api, FaucetConfig, FaucetService, PayoutDatabase};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Monero faucet payout service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// monero-wallet-rpc host
    #[arg(long)]
    wallet_host: Option<String>,

    /// monero-wallet-rpc port
    #[arg(long)]
    wallet_port: Option<u16>,

    /// Balance divisor for a single payout
    #[arg(long)]
    payout_factor: Option<i64>,

    /// Maximum single payout (XMR)
    #[arg(long)]
    maximum_payout: Option<Decimal>,

    /// Database path
    #[arg(long)]
    db_path: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FaucetConfig::load(args.config.as_deref())?;

    // Override with CLI arguments
    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
    }

    if let Some(host) = args.wallet_host {
        config.wallet_host = host;
    }

    if let Some(port) = args.wallet_port {
        config.wallet_port = port;
    }

    if let Some(factor) = args.payout_factor {
        config.payout_factor = factor;
    }

    if let Some(max) = args.maximum_payout {
        config.maximum_payout = max;
    }

    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;
    config.validate()?;

    info!("Starting Monero Faucet v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  Wallet RPC: {}", config.wallet_rpc_url());
    info!("  Daemon RPC: {}", config.daemon_rpc_url());
    info!(
        "  Payout: balance / {}, capped at {} XMR",
        config.payout_factor, config.maximum_payout
    );
    info!(
        "  Address quota: {} payout(s) / {} day(s)",
        config.address_rate_allowed, config.address_rate_window_days
    );
    if config.client_rate_limit_enabled {
        info!("  Client quota: 1 request / {} minute(s)", config.client_rate_period_minutes);
    } else {
        warn!("  Client quota disabled");
    }

    // Initialize database
    let database = PayoutDatabase::new(&config.db_path)?;
    let stats = database.get_statistics()?;
    info!("Previous statistics:");
    info!("  Total payouts: {}", stats.total_payouts);
    info!("  Unique addresses: {}", stats.unique_addresses);
    info!("  Total dispensed: {} XMR", stats.total_amount);

    let service = Arc::new(FaucetService::connect(config.clone(), database)?);
    info!("Faucet service initialized");

    let mut app = api::router(service.clone()).layer(TraceLayer::new_for_http());

    // Add CORS if enabled
    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        app = app.layer(cors);
        info!("CORS enabled");
    }

    // Limiter housekeeping
    let prune_service = service.clone();
    let prune_every = config.client_rate_period().max(Duration::from_secs(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_every);
        loop {
            interval.tick().await;
            prune_service.prune_client_state();
        }
    });

    let addr: SocketAddr = config.server_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Err(e) = service.database().flush() {
        error!("Failed to flush payout database: {}", e);
    }

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
