use anyhow::{Context, Result};
use async_proxy_common::constants::{DISPATCH_TIMEOUT_SECS, INGRESS_DEADLINE_SECS};
use async_proxy_gateway::{
    GatewayConfig, SharedState,
    handlers::connect,
    ingress::{http_proxy, socks5},
};
use clap::Parser;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// CLI arguments for the gateway
#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Proxy gateway dispatching client requests to connected edges", long_about = None)]
#[command(version)]
struct Args {
    /// HTTP-proxy listener host
    #[arg(long, default_value = "127.0.0.1")]
    http_host: String,

    /// HTTP-proxy listener port
    #[arg(long, default_value = "8080")]
    http_port: u16,

    /// SOCKS5 listener host
    #[arg(long, default_value = "127.0.0.1")]
    socks5_host: String,

    /// SOCKS5 listener port
    #[arg(long, default_value = "1080")]
    socks5_port: u16,

    /// Edge tunnel listener host
    #[arg(long, default_value = "0.0.0.0")]
    tunnel_host: String,

    /// Edge tunnel listener port
    #[arg(long, default_value = "9000")]
    tunnel_port: u16,

    /// Shared secret edges must present as a bearer token
    #[arg(long, env = "GATEWAY_TUNNEL_TOKEN")]
    tunnel_token: String,

    /// Seconds a dispatched request waits for its edge
    #[arg(long, default_value_t = DISPATCH_TIMEOUT_SECS)]
    dispatch_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn config_from_args(args: &Args) -> GatewayConfig {
    GatewayConfig {
        http_listen: format!("{}:{}", args.http_host, args.http_port),
        socks5_listen: format!("{}:{}", args.socks5_host, args.socks5_port),
        tunnel_listen: format!("{}:{}", args.tunnel_host, args.tunnel_port),
        tunnel_token: args.tunnel_token.clone(),
        dispatch_timeout: Duration::from_secs(args.dispatch_timeout),
        ingress_deadline: Duration::from_secs(INGRESS_DEADLINE_SECS),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn bind(addr: &str, name: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} listener on {}", name, addr))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    info!("Async Proxy Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = config_from_args(&args);
    let state = Arc::new(SharedState::new(config));

    // Fail at startup rather than on the first intercepted connection
    state
        .ca
        .get_or_create_fake_identity()
        .context("Failed to create fake TLS identity")?;

    let http_listener = bind(&state.config.http_listen, "HTTP proxy").await?;
    let socks5_listener = bind(&state.config.socks5_listen, "SOCKS5").await?;
    let tunnel_listener = bind(&state.config.tunnel_listen, "tunnel").await?;

    tokio::select! {
        result = http_proxy::run(http_listener, Arc::clone(&state)) => {
            error!("HTTP proxy listener exited: {:?}", result);
        }
        result = socks5::run(socks5_listener, Arc::clone(&state)) => {
            error!("SOCKS5 listener exited: {:?}", result);
        }
        result = connect::run(tunnel_listener, Arc::clone(&state)) => {
            error!("Tunnel listener exited: {:?}", result);
        }
        _ = tokio::signal::ctrl_c() => {
            info!(
                "Received Ctrl-C, shutting down ({} edges, {} pending requests)",
                state.registry.count(),
                state.registry.pending_count()
            );
        }
    }

    Ok(())
}
