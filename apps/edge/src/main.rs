mod executor;

use anyhow::{Context, Result};
use async_proxy_common::{
    RequestEnvelope,
    constants::{
        EDGE_REQUEST_TIMEOUT_SECS, HEARTBEAT_INTERVAL_SECS, MAX_TUNNEL_MESSAGE_BYTES,
        RECONNECT_MAX_DELAY_MS, RECONNECT_MIN_DELAY_MS, RECONNECT_MULTIPLIER,
    },
    decode, encode,
    validation::validate_request_id,
};
use clap::Parser;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        Message as WsMessage,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::WebSocketConfig,
    },
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::executor::Executor;

type WebSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// CLI arguments for the edge agent
#[derive(Parser, Debug)]
#[command(name = "edge")]
#[command(about = "Outbound-only edge executing requests proxied by the gateway", long_about = None)]
#[command(version)]
struct Args {
    /// Gateway tunnel endpoint
    #[arg(
        short,
        long,
        env = "EDGE_SERVER",
        default_value = "ws://127.0.0.1:9000/connect"
    )]
    server: String,

    /// Shared secret presented to the gateway
    #[arg(short, long, env = "EDGE_TOKEN")]
    token: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Upper bound in seconds for one outbound request
    #[arg(long, default_value_t = EDGE_REQUEST_TIMEOUT_SECS)]
    request_timeout: u64,
}

/// Configuration for the edge
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway tunnel URL (e.g., "ws://gateway:9000/connect")
    pub server_url: String,

    /// Shared secret sent as a bearer token
    pub token: String,

    /// Tunnel connection timeout
    pub connect_timeout: Duration,

    /// Upper bound for outbound requests
    pub request_timeout: Duration,

    /// Heartbeat interval
    pub heartbeat_interval: Duration,

    /// Reconnection strategy
    pub reconnect_config: ReconnectConfig,
}

/// Reconnection configuration with exponential backoff
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl ReconnectConfig {
    fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_millis(
            ((current.as_millis() as f64 * self.multiplier)
                .min(self.max_delay.as_millis() as f64)) as u64,
        )
    }
}

impl Config {
    fn from_args(args: Args) -> Self {
        Self {
            server_url: args.server,
            token: args.token,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            reconnect_config: ReconnectConfig {
                min_delay: Duration::from_millis(RECONNECT_MIN_DELAY_MS),
                max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
                multiplier: RECONNECT_MULTIPLIER,
            },
        }
    }
}

/// Connection manager handles the tunnel lifecycle and reconnection
pub struct ConnectionManager {
    config: Config,
    executor: Arc<Executor>,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Result<Self> {
        let executor = Executor::new(config.request_timeout, config.connect_timeout)
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            executor: Arc::new(executor),
        })
    }

    /// Main run loop with automatic reconnection
    pub async fn run(&self) -> Result<()> {
        let reconnect = &self.config.reconnect_config;
        let mut reconnect_delay = reconnect.min_delay;
        let mut attempt = 0;

        loop {
            match self.establish_connection().await {
                Ok(ws_stream) => {
                    reconnect_delay = reconnect.min_delay;
                    attempt = 0;
                    self.handle_connection(ws_stream).await;
                }
                Err(e) => {
                    error!("Failed to connect: {:#}", e);
                }
            }

            attempt += 1;
            info!(
                "Reconnecting in {:?} (attempt {})",
                reconnect_delay, attempt
            );
            tokio::time::sleep(reconnect_delay).await;
            reconnect_delay = reconnect.next_delay(reconnect_delay);
        }
    }

    /// Dial the gateway's tunnel endpoint with the bearer token
    async fn establish_connection(&self) -> Result<WebSocket> {
        debug!("Connecting to {}", self.config.server_url);

        let mut request = self
            .config
            .server_url
            .as_str()
            .into_client_request()
            .context("Invalid tunnel URL")?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.token))
                .context("Invalid token")?,
        );

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(MAX_TUNNEL_MESSAGE_BYTES))
            .max_frame_size(Some(MAX_TUNNEL_MESSAGE_BYTES));

        let (ws_stream, _) = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async_with_config(request, Some(ws_config), false),
        )
        .await
        .context("Tunnel connection timeout")?
        .context("Tunnel handshake failed")?;

        info!("✅ Tunnel established to {}", self.config.server_url);
        Ok(ws_stream)
    }

    /// Handle active tunnel with split read/write tasks
    async fn handle_connection(&self, ws_stream: WebSocket) {
        let (write, read) = ws_stream.split();

        let (outgoing_tx, outgoing_rx) = mpsc::channel(100);

        let write_handle = tokio::spawn(spawn_write_task(write, outgoing_rx));
        let read_handle = tokio::spawn(spawn_read_task(
            read,
            outgoing_tx.clone(),
            Arc::clone(&self.executor),
        ));
        let heartbeat_handle = tokio::spawn(spawn_heartbeat_task(
            outgoing_tx,
            self.config.heartbeat_interval,
        ));

        // Any task ending means the tunnel is gone
        tokio::select! {
            result = write_handle => {
                warn!("Write task ended: {:?}", result);
            }
            result = read_handle => {
                warn!("Read task ended: {:?}", result);
            }
            result = heartbeat_handle => {
                warn!("Heartbeat task ended: {:?}", result);
            }
        }
    }
}

/// Write task sends outgoing frames through the tunnel
async fn spawn_write_task(
    mut write: SplitSink<WebSocket, WsMessage>,
    mut outgoing_rx: mpsc::Receiver<WsMessage>,
) {
    while let Some(message) = outgoing_rx.recv().await {
        if let Err(e) = write.send(message).await {
            error!("Failed to send frame: {}", e);
            break;
        }
    }

    debug!("Write task exiting");
}

/// Read task receives request frames and dispatches them
async fn spawn_read_task(
    mut read: SplitStream<WebSocket>,
    outgoing_tx: mpsc::Sender<WsMessage>,
    executor: Arc<Executor>,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(WsMessage::Binary(payload)) => {
                handle_request_frame(&payload, &outgoing_tx, &executor);
            }
            Ok(WsMessage::Text(_)) => {
                warn!("Dropping unexpected text frame");
            }
            // Answered by tungstenite itself
            Ok(WsMessage::Ping(_)) => {
                debug!("Received tunnel ping");
            }
            Ok(WsMessage::Pong(_)) => {
                debug!("Received tunnel pong");
            }
            Ok(WsMessage::Close(_)) => {
                info!("Gateway closed tunnel");
                break;
            }
            Err(e) => {
                error!("Tunnel error: {}", e);
                break;
            }
            _ => {}
        }
    }

    debug!("Read task exiting");
}

/// Decode one request frame and execute it on its own task
///
/// Undecodable frames and requests with a malformed id are dropped: there is no id to
/// answer to.
fn handle_request_frame(
    payload: &[u8],
    outgoing_tx: &mpsc::Sender<WsMessage>,
    executor: &Arc<Executor>,
) {
    let request: RequestEnvelope = match decode(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!("Dropping undecodable request frame: {}", e);
            return;
        }
    };
    if let Err(e) = validate_request_id(&request.request_id) {
        warn!("Dropping request: {}", e);
        return;
    }

    debug!(
        "Received request {}: {} {}",
        request.request_id, request.method, request.full_url
    );

    let outgoing_tx = outgoing_tx.clone();
    let executor = Arc::clone(executor);
    tokio::spawn(async move {
        let start_time = Instant::now();
        let response = executor.execute(request).await;
        debug!(
            "Response {}: {} ({}ms)",
            response.request_id,
            response.status_code,
            start_time.elapsed().as_millis()
        );

        let payload = match encode(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode response {}: {}", response.request_id, e);
                return;
            }
        };
        if let Err(e) = outgoing_tx.send(WsMessage::Binary(payload.into())).await {
            error!("Failed to queue response {}: {}", response.request_id, e);
        }
    });
}

/// Heartbeat task sends periodic websocket pings
async fn spawn_heartbeat_task(outgoing_tx: mpsc::Sender<WsMessage>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        if let Err(e) = outgoing_tx.send(WsMessage::Ping(Vec::new().into())).await {
            error!("Failed to send heartbeat: {}", e);
            break;
        }

        debug!("Sent heartbeat");
    }

    debug!("Heartbeat task exiting");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Async Proxy Edge v{}", env!("CARGO_PKG_VERSION"));
    info!("Gateway: {}", args.server);

    let config = Config::from_args(args);
    let manager = ConnectionManager::new(config)?;

    tokio::select! {
        result = manager.run() => {
            error!("Connection manager exited: {:?}", result);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down gracefully...");
        }
    }

    Ok(())
}
