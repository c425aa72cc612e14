//! Read-ahead wrapper for sniffing a connection before handing it to hyper
//!
//! Bytes buffered while inspecting the stream are replayed to the next reader, so the
//! consumer sees the connection from its first byte.

use bytes::BytesMut;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

const INITIAL_CAPACITY: usize = 4 * 1024;

pub struct Prebuffered<S> {
    inner: S,
    buf: BytesMut,
    max_len: usize,
}

impl<S: AsyncRead + Unpin> Prebuffered<S> {
    pub fn new(inner: S, max_len: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY.min(max_len)),
            max_len,
        }
    }

    /// Unconsumed buffered bytes
    pub fn buffer(&self) -> &[u8] {
        &self.buf[..]
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.max_len
    }

    /// Drop `n` bytes from the front of the buffer
    pub fn discard(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        let _ = self.buf.split_to(n);
    }

    /// Read more from the inner stream, up to the buffer limit; 0 means EOF
    pub async fn buffer_more(&mut self) -> io::Result<usize> {
        let max = self.max_len.saturating_sub(self.buf.len());
        (&mut self.inner)
            .take(max as u64)
            .read_buf(&mut self.buf)
            .await
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Prebuffered<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if out.remaining() == 0 {
            Poll::Ready(Ok(()))
        } else if !self.buf.is_empty() {
            let n = self.buf.len().min(out.remaining());
            let chunk = self.buf.split_to(n);
            out.put_slice(&chunk);
            Poll::Ready(Ok(()))
        } else {
            Pin::new(&mut self.inner).poll_read(cx, out)
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Prebuffered<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_buffered_bytes_are_replayed() {
        let mut p = Prebuffered::new(&b"GET / HTTP/1.1\r\n\r\nrest"[..], 8);
        p.buffer_more().await.unwrap();
        assert_eq!(p.buffer(), b"GET / HT");
        assert!(p.is_full());

        let mut out = Vec::new();
        p.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"GET / HTTP/1.1\r\n\r\nrest");
    }

    #[tokio::test]
    async fn test_discard_consumes_prefix() {
        let mut p = Prebuffered::new(&b"CONNECT a:443 HTTP/1.1\r\n\r\n\x16\x03"[..], 64);
        p.buffer_more().await.unwrap();
        p.discard(26);
        assert_eq!(p.buffer(), b"\x16\x03");

        // Over-discarding empties the buffer without panicking
        p.discard(100);
        assert_eq!(p.buffer(), b"");
        assert_eq!(p.buffer_more().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_writes_pass_through() {
        let (client, server) = tokio::io::duplex(64);
        let mut p = Prebuffered::new(server, 64);
        p.write_all(b"pong").await.unwrap();
        drop(p);

        let mut client = client;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"pong");
    }
}
