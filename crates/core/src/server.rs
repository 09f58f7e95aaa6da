//! The RTSP server: acceptor, session table, unbound-session routing.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::conn::{self, ServerConn};
use crate::error::{Result, RtspError};
use crate::handler::ServerHandler;
use crate::protocol::sdp::multicast_base;
use crate::protocol::{Request, Response};
use crate::session::{ServerSession, SessionReply};

const SERVER_PORT_MIN: u64 = 5000;
const SERVER_PORT_MAX: u64 = 65534;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Server configuration. `handler` is the application; everything else has
/// a default.
#[derive(Clone)]
pub struct ServerConfig {
    /// Application callbacks and capability set.
    pub handler: Arc<dyn ServerHandler>,
    /// Per-read deadline, armed while a connection has no bound session.
    pub read_timeout: Duration,
    /// Per-write deadline, always armed.
    pub write_timeout: Duration,
    /// Idle session lifetime; refreshed by requests and inbound frames.
    pub session_timeout: Duration,
    /// Multicast CIDR range (e.g. `224.1.0.0/16`). Non-empty enables the
    /// `vlcmulticast` DESCRIBE query.
    pub multicast_ip_range: Option<String>,
    /// Enable TLS with the given materials.
    pub tls: Option<Arc<tokio_rustls::rustls::ServerConfig>>,
    /// Transport binding hint advertised for UDP RTP (media delivery
    /// itself lives outside the core).
    pub udp_rtp_listen_ip: Option<IpAddr>,
    /// Transport binding hint advertised for UDP RTCP.
    pub udp_rtcp_listen_ip: Option<IpAddr>,
    /// Value of the mandatory `Server` response header.
    pub server_agent: String,
}

impl ServerConfig {
    pub fn new(handler: Arc<dyn ServerHandler>) -> Self {
        ServerConfig {
            handler,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            multicast_ip_range: None,
            tls: None,
            udp_rtp_listen_ip: None,
            udp_rtcp_listen_ip: None,
            server_agent: concat!("rtspd/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// An RTSP server endpoint.
///
/// Accepts TCP connections, spawns a [`ServerConn`] per socket, and owns
/// the session table keyed by secret session ID. Shutdown fires a single
/// cancellation that every connection and session observes.
///
/// ```no_run
/// use std::sync::Arc;
/// use rtspd::{Server, ServerConfig, ServerHandler};
///
/// struct App;
/// impl ServerHandler for App {}
///
/// # async fn run() -> rtspd::Result<()> {
/// let mut server = Server::new("0.0.0.0:8554", ServerConfig::new(Arc::new(App)));
/// server.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    bind_addr: String,
    inner: Arc<ServerInner>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(bind_addr: &str, config: ServerConfig) -> Self {
        let multicast = config
            .multicast_ip_range
            .as_deref()
            .and_then(multicast_base);
        Server {
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            inner: Arc::new(ServerInner {
                config,
                token: CancellationToken::new(),
                sessions: RwLock::new(HashMap::new()),
                conns: RwLock::new(Vec::new()),
                next_server_port: AtomicU64::new(SERVER_PORT_MIN),
                multicast,
            }),
        }
    }

    /// Bind the listener and spawn the acceptor task. Port 0 binds an
    /// ephemeral port, resolved via [`local_addr`](Self::local_addr).
    pub async fn start(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        tracing::info!(addr = %local_addr, "RTSP server listening");
        tokio::spawn(accept_loop(listener, self.inner.clone()));
        Ok(())
    }

    /// Address the listener is bound to; `None` before [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Shut the server down. Every connection terminates with
    /// [`RtspError::Terminated`]; every session closes.
    pub fn close(&self) {
        tracing::info!("server closing");
        self.inner.token.cancel();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inner.token.cancel();
    }
}

async fn accept_loop(listener: TcpListener, inner: Arc<ServerInner>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => {
                    let _ = socket.set_nodelay(true);
                    tokio::spawn(conn::run_conn(socket, inner.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            },
            _ = inner.token.cancelled() => break,
        }
    }
    tracing::debug!("accept loop exited");
}

/// Shared server state, reachable from every connection and session task.
pub(crate) struct ServerInner {
    config: ServerConfig,
    token: CancellationToken,
    sessions: RwLock<HashMap<String, Arc<ServerSession>>>,
    conns: RwLock<Vec<Arc<ServerConn>>>,
    next_server_port: AtomicU64,
    multicast: Option<Ipv4Addr>,
}

impl ServerInner {
    pub(crate) fn handler(&self) -> &Arc<dyn ServerHandler> {
        &self.config.handler
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    pub(crate) fn write_timeout(&self) -> Duration {
        self.config.write_timeout
    }

    pub(crate) fn session_timeout(&self) -> Duration {
        self.config.session_timeout
    }

    pub(crate) fn server_agent(&self) -> &str {
        &self.config.server_agent
    }

    pub(crate) fn tls_config(&self) -> Option<Arc<tokio_rustls::rustls::ServerConfig>> {
        self.config.tls.clone()
    }

    pub(crate) fn multicast_base(&self) -> Option<Ipv4Addr> {
        self.multicast
    }

    pub(crate) fn register_conn(&self, conn: &Arc<ServerConn>) {
        self.conns.write().push(conn.clone());
    }

    pub(crate) fn remove_conn(&self, conn: &Arc<ServerConn>) {
        self.conns.write().retain(|c| !Arc::ptr_eq(c, conn));
    }

    /// Drop a session from the table, provided the entry is still this
    /// session and not a replacement under the same ID.
    pub(crate) fn remove_session(&self, session: &Arc<ServerSession>) {
        let mut sessions = self.sessions.write();
        if let Some(current) = sessions.get(session.secret_id()) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(session.secret_id());
            }
        }
    }

    /// Route a request that arrived on a connection with no bound session:
    /// look the session up by secret ID, or create one for a
    /// session-creating method (ANNOUNCE, SETUP) without an ID.
    pub(crate) async fn handle_session_request(
        self: &Arc<Self>,
        conn: &Arc<ServerConn>,
        req: Request,
        sx_id: &str,
        create: bool,
    ) -> SessionReply {
        if !sx_id.is_empty() {
            let existing = self.sessions.read().get(sx_id).cloned();
            return match existing {
                Some(session) => session.handle_request(conn.clone(), req).await,
                None => (
                    Response::new(454),
                    None,
                    Some(RtspError::SessionNotFound(sx_id.to_string())),
                ),
            };
        }

        if create {
            let session = self.create_session();
            return session.handle_request(conn.clone(), req).await;
        }

        (
            Response::new(454),
            None,
            Some(RtspError::SessionNotFound(String::new())),
        )
    }

    /// Create a session under a fresh unguessable ID and register it.
    fn create_session(self: &Arc<Self>) -> Arc<ServerSession> {
        let mut sessions = self.sessions.write();
        let secret_id = loop {
            let id = random_session_id();
            if !sessions.contains_key(&id) {
                break id;
            }
        };
        let session = ServerSession::spawn(self.clone(), secret_id.clone());
        sessions.insert(secret_id, session.clone());
        session
    }

    /// Allocate a (RTP, RTCP) server port pair to advertise in SETUP
    /// replies. Monotonic from 5000, wrapping at 65534. Per RFC 3550 §11,
    /// RTP ports are even and RTCP = RTP + 1.
    pub(crate) fn allocate_server_ports(&self) -> (u16, u16) {
        let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);
        if rtp > SERVER_PORT_MAX {
            self.next_server_port.store(SERVER_PORT_MIN, Ordering::SeqCst);
            let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);
            return (rtp as u16, rtp as u16 + 1);
        }
        (rtp as u16, rtp as u16 + 1)
    }
}

/// 64 bits of randomness, hex-encoded: unguessable, which is the only
/// contract the Session header requires.
fn random_session_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
