//! SOCKS5 front door
//!
//! Only the CONNECT command without authentication is supported. The success reply is
//! sent immediately; the outcome of the tunneled exchange is signalled by the failure
//! reply [`Socks5Conn`] writes when it is shut down.

use async_proxy_common::{TunnelError, constants::TLS_HANDSHAKE_RECORD};
use std::{
    future::Future,
    io,
    net::{Ipv4Addr, Ipv6Addr},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpListener;
use tokio::time::{Instant, Sleep, sleep_until};
use tracing::{Instrument, debug, info, info_span, warn};

use super::{
    IngressError,
    intercept::{InterceptTarget, serve_http1, serve_tls},
};
use crate::{SharedState, handlers::forwarding::Origin};

mod socks5 {
    pub const VERSION: u8 = 0x05;

    pub const AUTH_NONE: u8 = 0x00;
    pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

    pub const CMD_CONNECT: u8 = 0x01;

    pub const ATYP_IPV4: u8 = 0x01;
    pub const ATYP_DOMAIN: u8 = 0x03;
    pub const ATYP_IPV6: u8 = 0x04;

    pub const REPLY_SUCCEEDED: u8 = 0x00;
    pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
    pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
    pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// Reply with an all-zero IPv4 bound address
const fn reply_frame(code: u8) -> [u8; 10] {
    [socks5::VERSION, code, 0x00, socks5::ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}

const SESSION_ENDED_REPLY: [u8; 10] = reply_frame(socks5::REPLY_GENERAL_FAILURE);

/// Destination requested by a SOCKS5 CONNECT; IPv6 hosts are bracketed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

async fn send_reply<S: AsyncWrite + Unpin>(stream: &mut S, code: u8) -> io::Result<()> {
    stream.write_all(&reply_frame(code)).await?;
    stream.flush().await
}

/// Run the greeting and CONNECT request, replying success once the destination is read
pub async fn negotiate<S>(stream: &mut S) -> Result<Destination, IngressError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != socks5::VERSION {
        return Err(IngressError::Socks5(format!(
            "unsupported version {}",
            greeting[0]
        )));
    }

    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&socks5::AUTH_NONE) {
        stream
            .write_all(&[socks5::VERSION, socks5::AUTH_NO_ACCEPTABLE])
            .await?;
        return Err(IngressError::Socks5(
            "client offers no acceptable authentication method".to_string(),
        ));
    }
    stream.write_all(&[socks5::VERSION, socks5::AUTH_NONE]).await?;

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != socks5::VERSION {
        return Err(IngressError::Socks5(format!(
            "unsupported request version {}",
            request[0]
        )));
    }
    if request[1] != socks5::CMD_CONNECT {
        send_reply(stream, socks5::REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(IngressError::Socks5(format!(
            "unsupported command {}",
            request[1]
        )));
    }

    let host = match request[3] {
        socks5::ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        socks5::ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name)
                .map_err(|_| IngressError::Socks5("domain name is not UTF-8".to_string()))?
        }
        socks5::ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            format!("[{}]", Ipv6Addr::from(octets))
        }
        other => {
            send_reply(stream, socks5::REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(IngressError::Socks5(format!(
                "unsupported address type {}",
                other
            )));
        }
    };
    let port = stream.read_u16().await?;

    send_reply(stream, socks5::REPLY_SUCCEEDED).await?;
    Ok(Destination { host, port })
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")
}

/// Fails with `TimedOut` once `deadline` has passed, registering a wakeup otherwise
fn poll_deadline(
    deadline: Option<Instant>,
    timer: &mut Option<Pin<Box<Sleep>>>,
    cx: &mut Context<'_>,
) -> io::Result<()> {
    let Some(deadline) = deadline else {
        return Ok(());
    };
    if Instant::now() >= deadline {
        return Err(deadline_exceeded());
    }

    let timer = timer.get_or_insert_with(|| Box::pin(sleep_until(deadline)));
    if timer.deadline() != deadline {
        timer.as_mut().reset(deadline);
    }
    match timer.as_mut().poll(cx) {
        Poll::Ready(()) => Err(deadline_exceeded()),
        Poll::Pending => Ok(()),
    }
}

/// Connection surface over a negotiated SOCKS5 stream
///
/// Adds per-direction deadlines, a one-byte push-back used for protocol sniffing, and
/// a shutdown that reports the end of the tunneled session to the SOCKS5 client.
pub struct Socks5Conn<S> {
    inner: S,
    peeked: Option<u8>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
    /// Bytes of the session-ended reply already written
    close_progress: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Socks5Conn<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            peeked: None,
            read_deadline: None,
            write_deadline: None,
            read_timer: None,
            write_timer: None,
            close_progress: 0,
        }
    }

    /// Set both deadlines
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }

    /// Look at the next byte without consuming it; `None` at EOF
    pub async fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(byte) = self.peeked {
            return Ok(Some(byte));
        }

        let mut byte = [0u8; 1];
        if self.read(&mut byte).await? == 0 {
            return Ok(None);
        }
        self.peeked = Some(byte[0]);
        Ok(Some(byte[0]))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Socks5Conn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if let Some(byte) = this.peeked.take() {
            buf.put_slice(&[byte]);
            return Poll::Ready(Ok(()));
        }

        poll_deadline(this.read_deadline, &mut this.read_timer, cx)?;
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Socks5Conn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        poll_deadline(this.write_deadline, &mut this.write_timer, cx)?;
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        poll_deadline(this.write_deadline, &mut this.write_timer, cx)?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        poll_deadline(this.write_deadline, &mut this.write_timer, cx)?;

        while this.close_progress < SESSION_ENDED_REPLY.len() {
            let n = ready!(
                Pin::new(&mut this.inner).poll_write(cx, &SESSION_ENDED_REPLY[this.close_progress..])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.close_progress += n;
        }

        ready!(Pin::new(&mut this.inner).poll_flush(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Serve one client connection of the SOCKS5 listener
pub async fn handle_connection<S>(mut stream: S, state: Arc<SharedState>) -> Result<(), IngressError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Destination { host, port } = negotiate(&mut stream).await?;
    debug!("SOCKS5 CONNECT {}:{}", host, port);

    let mut conn = Socks5Conn::new(stream);
    conn.set_deadline(Some(Instant::now() + state.config.ingress_deadline));

    match conn.peek_byte().await? {
        None => Ok(()),
        Some(TLS_HANDSHAKE_RECORD) => {
            serve_tls(conn, state, InterceptTarget::Socks { host, port }).await
        }
        Some(_) => {
            let origin = Origin {
                tls: false,
                server_name: None,
                fallback_host: Some(host),
                port_override: Some(port),
            };
            serve_http1(conn, state, origin).await
        }
    }
}

/// Run one SOCKS5 session under the ingress deadline
pub async fn serve_with_deadline<S>(stream: S, state: Arc<SharedState>) -> Result<(), IngressError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let deadline = state.config.ingress_deadline;
    match tokio::time::timeout(deadline, handle_connection(stream, state)).await {
        Ok(result) => result,
        Err(_) => Err(TunnelError::business(500, "request processing timeout").into()),
    }
}

/// Accept SOCKS5 clients until the listener fails
pub async fn run(listener: TcpListener, state: Arc<SharedState>) -> io::Result<()> {
    info!("SOCKS5 proxy listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("SOCKS5 accept failed: {}", e);
                continue;
            }
        };

        let state = Arc::clone(&state);
        tokio::spawn(
            async move {
                match serve_with_deadline(stream, state).await {
                    Ok(()) => debug!("Session finished"),
                    Err(IngressError::Dispatch(e)) => warn!("Session aborted: {}", e),
                    Err(e) => debug!("Session aborted: {}", e),
                }
            }
            .instrument(info_span!("socks5", %peer)),
        );
    }
}
