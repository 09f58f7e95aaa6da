//! Byte-stream plumbing underneath the RTSP connection pipeline.
//!
//! - [`counted`]: a transparent [`AsyncRead`](tokio::io::AsyncRead) /
//!   [`AsyncWrite`](tokio::io::AsyncWrite) wrapper feeding the
//!   per-connection byte counters.
//! - [`framed`]: the optionally TLS-wrapped socket split into a frame
//!   reader and a response writer, each with per-operation deadlines.
//!
//! Media delivery (UDP sockets, RTP fan-out) is intentionally absent; the
//! core negotiates transports but does not move media.

pub(crate) mod counted;
pub(crate) mod framed;
