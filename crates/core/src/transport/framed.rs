//! The framed view of an accepted socket.
//!
//! An accepted TCP stream (optionally wrapped in TLS) is split into two
//! halves so that the reader task and the connection event loop can own
//! their direction independently:
//!
//! - [`FrameReader`]: yields one [`Message`] per call, with an optional
//!   per-read deadline (armed while no session is bound).
//! - [`FrameWriter`]: writes responses, always under the write deadline.

use std::io;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{Result, RtspError};
use crate::protocol::{Message, Response, RtspCodec};

/// An accepted socket, plain or TLS-wrapped.
pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

type CountedIo = super::counted::CountedStream<MaybeTlsStream>;

/// Split a socket into its framed halves, wiring up the byte counters.
pub(crate) fn split_framed(
    stream: MaybeTlsStream,
    received: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
    read_timeout: Duration,
    write_timeout: Duration,
) -> (FrameReader, FrameWriter) {
    let counted = super::counted::CountedStream::new(stream, received, sent);
    let (read_half, write_half) = tokio::io::split(counted);
    (
        FrameReader {
            inner: FramedRead::new(read_half, RtspCodec),
            read_timeout,
        },
        FrameWriter {
            inner: FramedWrite::new(write_half, RtspCodec),
            write_timeout,
        },
    )
}

/// Read side: one framed unit per call.
pub(crate) struct FrameReader {
    inner: FramedRead<ReadHalf<CountedIo>, RtspCodec>,
    read_timeout: Duration,
}

impl FrameReader {
    /// Read the next frame. When `deadline_armed`, the whole read must
    /// complete within the read timeout; otherwise it waits indefinitely
    /// (session inactivity is policed elsewhere).
    pub(crate) async fn read(&mut self, deadline_armed: bool) -> Result<Message> {
        let item = if deadline_armed {
            timeout(self.read_timeout, self.inner.next())
                .await
                .map_err(|_| RtspError::Io(io::Error::new(io::ErrorKind::TimedOut, "read timeout")))?
        } else {
            self.inner.next().await
        };
        match item {
            Some(result) => result,
            None => Err(RtspError::ConnectionClosed),
        }
    }
}

/// Write side: serializes responses under the write deadline.
pub(crate) struct FrameWriter {
    inner: FramedWrite<WriteHalf<CountedIo>, RtspCodec>,
    write_timeout: Duration,
}

impl FrameWriter {
    pub(crate) async fn write_response(&mut self, res: Response) -> Result<()> {
        timeout(self.write_timeout, self.inner.send(res))
            .await
            .map_err(|_| RtspError::Io(io::Error::new(io::ErrorKind::TimedOut, "write timeout")))?
    }
}
