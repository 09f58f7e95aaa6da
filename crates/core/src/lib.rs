//! # rtspd — RTSP server endpoint core
//!
//! The server side of an RTSP (Real-Time Streaming Protocol) endpoint: the
//! per-connection request pipeline and the per-session state machines it
//! drives. Media delivery (RTP packetization, UDP fan-out) is deliberately
//! outside this crate; applications receive callbacks and return responses.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Message grammar, method semantics, session lifecycle, interleaved framing |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description generation for DESCRIBE responses |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Server port pair conventions advertised during SETUP |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Application  — ServerHandler callbacks        │
//! ├───────────────────────────────────────────────┤
//! │  Server       — acceptor, session table        │
//! │  ServerConn   — event loop, method dispatch    │
//! │  ServerSession— state machine, transport       │
//! ├───────────────────────────────────────────────┤
//! │  Protocol     — messages, codec, SDP           │
//! │  Transport    — framed socket halves, counters │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Each connection runs two tasks (frame reader + event loop), each session
//! one; bounded channels carry events between them and a cancellation token
//! tree propagates shutdown. Within a connection, requests are served one
//! at a time in wire order; within a session, requests from all connections
//! are linearized by the session's event loop.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtspd::{Capabilities, Server, ServerConfig, ServerHandler};
//!
//! struct App;
//!
//! impl ServerHandler for App {
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities { describe: true, ..Default::default() }
//!     }
//!     // ... implement on_describe ...
//! }
//!
//! # async fn run() -> rtspd::Result<()> {
//! let mut server = Server::new("0.0.0.0:8554", ServerConfig::new(Arc::new(App)));
//! server.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — [`Server`] acceptor, [`ServerConfig`], session table.
//! - [`conn`] — [`ServerConn`], the per-connection pipeline.
//! - [`session`] — [`ServerSession`] state machine and transport negotiation.
//! - [`handler`] — [`ServerHandler`] trait and [`Capabilities`].
//! - [`protocol`] — messages, wire codec, SDP generation.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod conn;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stream;
pub(crate) mod transport;

pub use conn::ServerConn;
pub use error::{Result, RtspError};
pub use handler::{
    AnnounceCtx, Capabilities, DescribeCtx, ParameterCtx, PauseCtx, PlayCtx, RecordCtx,
    ServerHandler, SetupCtx,
};
pub use protocol::sdp::{MediaDescription, MediaFormat, MediaKind, StreamDescription};
pub use protocol::{Headers, Method, Request, Response};
pub use server::{Server, ServerConfig};
pub use session::transport::{TransportHeader, TransportProtocol};
pub use session::{ServerSession, SessionState};
pub use stream::ServerStream;

/// Re-export of the TLS configuration types accepted by
/// [`ServerConfig::tls`](crate::ServerConfig).
pub use tokio_rustls::rustls;
