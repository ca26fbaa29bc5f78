use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtsp_webrtc_relay::config::ConfigStore;
use rtsp_webrtc_relay::rtsp::RetinaConnector;
use rtsp_webrtc_relay::state::AppState;
use rtsp_webrtc_relay::utils::{bind_tcp_listener, listen_addr};
use rtsp_webrtc_relay::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// RTSP to WebRTC relay command line arguments
#[derive(Parser, Debug)]
#[command(name = "rtsp-webrtc-relay")]
#[command(version, about = "Relay RTSP H.264 cameras to WebRTC viewers", long_about = None)]
struct CliArgs {
    /// Configuration file
    #[arg(short = 'c', long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,

    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting rtsp-webrtc-relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config_store = ConfigStore::load(&args.config).await;
    config_store.update(|config| {
        if let Some(address) = args.address {
            config.bind_address = address;
        }
        if let Some(port) = args.port {
            config.port = port;
        }
    });
    let config = config_store.get();
    tracing::info!(
        "rtsp_timeout={}s rtp_timeout={}s reconnect_delay={}s ice_servers={}",
        config.rtsp_timeout,
        config.rtp_timeout,
        config.reconnect_delay,
        config.ice_servers.len()
    );

    let state = AppState::new(config_store, Arc::new(RetinaConnector::new()));
    let app = web::create_router(state.clone());

    // Failing to bind is the one startup error that ends the process
    let addr = listen_addr(&config.bind_address, config.port)?;
    let listener = bind_tcp_listener(addr)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let server = axum::serve(listener, app);

    tokio::select! {
        _ = shutdown_signal() => {}
        result = server => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    state.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // webrtc-rs is chatty below warn
    let filter = match effective_level {
        LogLevel::Error => "rtsp_webrtc_relay=error,tower_http=error,webrtc=error",
        LogLevel::Warn => "rtsp_webrtc_relay=warn,tower_http=warn,webrtc=warn",
        LogLevel::Info => "rtsp_webrtc_relay=info,tower_http=info,webrtc=warn",
        LogLevel::Verbose => "rtsp_webrtc_relay=debug,tower_http=info,webrtc=warn",
        LogLevel::Debug => "rtsp_webrtc_relay=debug,tower_http=debug,retina=info,webrtc=warn",
        LogLevel::Trace => "rtsp_webrtc_relay=trace,tower_http=debug,retina=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
