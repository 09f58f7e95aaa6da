//! RTSP session state (RFC 2326 §3, §12.37).
//!
//! A session is created by the first ANNOUNCE (record path) or first SETUP
//! (play path) that carries no Session header, and destroyed by TEARDOWN,
//! by loss of the connection carrying its TCP media transport, or by the
//! inactivity timeout.
//!
//! ## Lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! play path:    Initial --SETUP--> Ready --PLAY--> Play --PAUSE--> Ready
//! record path:  Initial --ANNOUNCE--> Prerecord --SETUP--> Prerecord
//!                        --RECORD--> Record --PAUSE--> Prerecord
//! any state:    TEARDOWN -> destroyed
//! ```
//!
//! Requests may arrive from several connections; a single event loop owns
//! the state and linearizes them. Each served request returns the binding
//! the calling connection should keep — `None` after TEARDOWN, which is how
//! detachment propagates back to the caller.

pub mod transport;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::conn::ServerConn;
use crate::error::RtspError;
use crate::handler::{AnnounceCtx, ParameterCtx, PauseCtx, PlayCtx, RecordCtx, SetupCtx};
use crate::protocol::{Method, Request, Response};
use crate::server::ServerInner;
use transport::{TransportHeader, TransportProtocol};

/// RTSP session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no media configured yet.
    Initial,
    /// ANNOUNCE accepted; awaiting SETUP and RECORD.
    Prerecord,
    /// SETUP complete on the play path; awaiting PLAY.
    Ready,
    /// Streaming outbound.
    Play,
    /// Streaming inbound.
    Record,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Initial => write!(f, "initial"),
            SessionState::Prerecord => write!(f, "prerecord"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Play => write!(f, "play"),
            SessionState::Record => write!(f, "record"),
        }
    }
}

/// Reply to a routed request: the response, the session binding the calling
/// connection should keep (`None` detaches), and the error that decides the
/// connection's fate.
pub(crate) type SessionReply = (Response, Option<Arc<ServerSession>>, Option<RtspError>);

pub(crate) struct SessionRequest {
    pub(crate) conn: Arc<ServerConn>,
    pub(crate) req: Request,
    pub(crate) ack: oneshot::Sender<SessionReply>,
}

pub(crate) enum SessionEvent {
    Request(SessionRequest),
    RemoveConn(Arc<ServerConn>),
}

/// A server-side RTSP session.
///
/// The public handle; the state lives in the session's event-loop task.
/// Shared by every connection that SETUP'd or ANNOUNCE'd it and by the
/// server's session table.
pub struct ServerSession {
    secret_id: String,
    token: CancellationToken,
    tx: mpsc::Sender<SessionEvent>,
    state: Mutex<SessionState>,
    user_data: Mutex<Option<Box<dyn Any + Send>>>,
}

impl ServerSession {
    /// Create the session and spawn its event loop. The caller must have
    /// reserved `secret_id` in the server's session table.
    pub(crate) fn spawn(server: Arc<ServerInner>, secret_id: String) -> Arc<ServerSession> {
        let (tx, rx) = mpsc::channel(1);
        let session = Arc::new(ServerSession {
            secret_id,
            token: server.token().child_token(),
            tx,
            state: Mutex::new(SessionState::Initial),
            user_data: Mutex::new(None),
        });

        let task = SessionTask {
            session: session.clone(),
            server,
            rx,
            conns: Vec::new(),
            announced_path: None,
            medias: Vec::new(),
            tcp_conn: None,
            activity: Arc::new(Mutex::new(Instant::now())),
        };
        tokio::spawn(task.run());

        session
    }

    /// The opaque ID the client presents in the `Session` header.
    pub(crate) fn secret_id(&self) -> &str {
        &self.secret_id
    }

    /// Current state of the session's state machine.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Destroy the session.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Attach opaque user data to the session.
    pub fn set_user_data(&self, data: Box<dyn Any + Send>) {
        *self.user_data.lock() = Some(data);
    }

    /// Remove and return previously attached user data.
    pub fn take_user_data(&self) -> Option<Box<dyn Any + Send>> {
        self.user_data.lock().take()
    }

    /// Route a request into the session's event loop and wait for the
    /// reply. Serialization point for requests from multiple connections.
    ///
    /// A request racing the session's destruction answers 454: the caller
    /// detaches but keeps its connection.
    pub(crate) async fn handle_request(
        &self,
        conn: Arc<ServerConn>,
        req: Request,
    ) -> SessionReply {
        let (ack_tx, ack_rx) = oneshot::channel();
        let event = SessionEvent::Request(SessionRequest {
            conn,
            req,
            ack: ack_tx,
        });

        tokio::select! {
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    return self.gone();
                }
            }
            _ = self.token.cancelled() => return self.gone(),
        }

        match ack_rx.await {
            Ok(reply) => reply,
            Err(_) => self.gone(),
        }
    }

    fn gone(&self) -> SessionReply {
        (
            Response::new(454),
            None,
            Some(RtspError::SessionNotFound(self.secret_id.clone())),
        )
    }

    /// Tell the session a connection went away. Falls through silently when
    /// the session is already closing.
    pub(crate) async fn remove_conn(&self, conn: Arc<ServerConn>) {
        tokio::select! {
            _ = self.tx.send(SessionEvent::RemoveConn(conn)) => {}
            _ = self.token.cancelled() => {}
        }
    }
}

/// The event-loop task owning all mutable session state.
struct SessionTask {
    session: Arc<ServerSession>,
    server: Arc<ServerInner>,
    rx: mpsc::Receiver<SessionEvent>,
    /// Connections that have routed a request through this session, for
    /// detach fan-out on close.
    conns: Vec<Arc<ServerConn>>,
    announced_path: Option<String>,
    /// Transport negotiated per SETUP media, in SETUP order.
    medias: Vec<TransportHeader>,
    /// Connection carrying the TCP media transport; its loss closes the session.
    tcp_conn: Option<Arc<ServerConn>>,
    /// Refreshed by every routed request and inbound interleaved frame.
    activity: Arc<Mutex<Instant>>,
}

impl SessionTask {
    async fn run(mut self) {
        let session_id = self.session.secret_id.clone();
        self.server
            .handler()
            .on_session_open(&self.session)
            .await;
        tracing::info!(%session_id, "session created");

        let err = self.run_inner().await;

        self.session.token.cancel();
        self.server.remove_session(&self.session);
        for conn in &self.conns {
            conn.notify_session_removed(&self.session).await;
        }
        self.server
            .handler()
            .on_session_close(&self.session, &err)
            .await;
        tracing::info!(%session_id, reason = %err, "session destroyed");
    }

    async fn run_inner(&mut self) -> RtspError {
        loop {
            let timeout = self.server.session_timeout();
            let idle = self.activity.lock().elapsed();
            if idle >= timeout {
                return RtspError::SessionTimedOut;
            }

            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(SessionEvent::Request(sreq)) => {
                        if self.serve(sreq).await {
                            return RtspError::SessionTornDown;
                        }
                    }
                    Some(SessionEvent::RemoveConn(conn)) => {
                        if self.remove_conn(conn) {
                            return RtspError::LinkedConnectionClosed;
                        }
                    }
                    None => return RtspError::Terminated,
                },
                _ = tokio::time::sleep(timeout - idle) => {}
                _ = self.session.token.cancelled() => return RtspError::Terminated,
            }
        }
    }

    /// Serve one routed request. Returns true when the session was torn down.
    async fn serve(&mut self, sreq: SessionRequest) -> bool {
        *self.activity.lock() = Instant::now();
        if !self.conns.iter().any(|c| Arc::ptr_eq(c, &sreq.conn)) {
            self.conns.push(sreq.conn.clone());
        }

        let ((mut res, binding, err), torn_down) =
            self.handle_request_inner(&sreq.conn, &sreq.req).await;

        // Clients correlate by whatever the server returned in the first
        // Session header, so every success response carries it.
        if res.status == 200 && !res.headers.contains("Session") && !torn_down {
            res.headers.set(
                "Session",
                &format!(
                    "{};timeout={}",
                    self.session.secret_id,
                    self.server.session_timeout().as_secs()
                ),
            );
        }

        let _ = sreq.ack.send((res, binding, err));
        torn_down
    }

    async fn handle_request_inner(
        &mut self,
        conn: &Arc<ServerConn>,
        req: &Request,
    ) -> (SessionReply, bool) {
        let state = self.session.state();
        let keep = Some(self.session.clone());
        let handler = self.server.handler().clone();
        let caps = handler.capabilities();

        match &req.method {
            Method::Options => ((Response::ok(), keep, None), false),

            Method::Announce => {
                if state != SessionState::Initial {
                    return (self.not_valid(req, state), false);
                }
                let (path, query) = req.path_and_query();
                let (res, err) = handler
                    .on_announce(AnnounceCtx {
                        conn,
                        session: &self.session,
                        request: req,
                        path: path.clone(),
                        query,
                    })
                    .await;
                if res.status == 200 {
                    self.announced_path = Some(path);
                    self.set_state(SessionState::Prerecord);
                }
                ((res, keep, err), false)
            }

            Method::Setup => {
                let header = match req.headers.get("Transport") {
                    Some(h) => h,
                    None => {
                        tracing::warn!(
                            session_id = %self.session.secret_id,
                            "SETUP missing Transport header"
                        );
                        return ((Response::new(400), keep, None), false);
                    }
                };
                let th = match TransportHeader::parse(header) {
                    Some(th) => th,
                    None => {
                        tracing::warn!(
                            session_id = %self.session.secret_id,
                            transport = header,
                            "SETUP with unsupported Transport header"
                        );
                        return ((Response::new(461), keep, None), false);
                    }
                };

                let legal = if th.record {
                    state == SessionState::Prerecord
                } else {
                    matches!(state, SessionState::Initial | SessionState::Ready)
                };
                if !legal {
                    return (self.not_valid(req, state), false);
                }

                let (path, query) = req.path_and_query();
                if let Some(announced) = &self.announced_path {
                    if !path.starts_with(announced.as_str()) {
                        tracing::warn!(
                            session_id = %self.session.secret_id,
                            announced = %announced,
                            path = %path,
                            "SETUP path does not match announced path"
                        );
                        return ((Response::new(400), keep, None), false);
                    }
                }

                let (mut res, err) = handler
                    .on_setup(SetupCtx {
                        conn,
                        session: &self.session,
                        request: req,
                        path,
                        query,
                        transport: &th,
                    })
                    .await;
                if res.status == 200 {
                    let server_ports = match th.protocol {
                        TransportProtocol::Udp => Some(self.server.allocate_server_ports()),
                        TransportProtocol::Tcp => None,
                    };
                    res.headers.set("Transport", &th.reply_value(server_ports));
                    let record = th.record;
                    self.medias.push(th);
                    if !record && state == SessionState::Initial {
                        self.set_state(SessionState::Ready);
                    }
                }
                ((res, keep, err), false)
            }

            Method::Play => {
                if !matches!(state, SessionState::Ready | SessionState::Play) {
                    return (self.not_valid(req, state), false);
                }
                let (path, query) = req.path_and_query();
                let (res, err) = handler
                    .on_play(PlayCtx {
                        conn,
                        session: &self.session,
                        request: req,
                        path,
                        query,
                    })
                    .await;
                if res.status == 200 && state == SessionState::Ready {
                    self.set_state(SessionState::Play);
                    self.enable_tcp_media(conn);
                }
                ((res, keep, err), false)
            }

            Method::Record => {
                if state != SessionState::Prerecord || self.medias.is_empty() {
                    return (self.not_valid(req, state), false);
                }
                let (path, query) = req.path_and_query();
                let (res, err) = handler
                    .on_record(RecordCtx {
                        conn,
                        session: &self.session,
                        request: req,
                        path,
                        query,
                    })
                    .await;
                if res.status == 200 {
                    self.set_state(SessionState::Record);
                    self.enable_tcp_media(conn);
                }
                ((res, keep, err), false)
            }

            Method::Pause => {
                if !matches!(state, SessionState::Play | SessionState::Record) {
                    return (self.not_valid(req, state), false);
                }
                let (path, query) = req.path_and_query();
                let (res, err) = handler
                    .on_pause(PauseCtx {
                        conn,
                        session: &self.session,
                        request: req,
                        path,
                        query,
                    })
                    .await;
                if res.status == 200 {
                    match state {
                        SessionState::Record => self.set_state(SessionState::Prerecord),
                        _ => self.set_state(SessionState::Ready),
                    }
                }
                ((res, keep, err), false)
            }

            Method::Teardown => ((Response::ok(), None, None), true),

            Method::GetParameter | Method::SetParameter => {
                let get = req.method == Method::GetParameter;
                let capable = if get { caps.get_parameter } else { caps.set_parameter };
                if !capable {
                    // GET_PARAMETER doubles as the keepalive (RFC 2326
                    // §10.8): activity was already refreshed, an empty 200
                    // is enough. SET_PARAMETER has no such default.
                    let res = if get { Response::ok() } else { Response::new(501) };
                    return ((res, keep, None), false);
                }
                let (path, query) = req.path_and_query();
                let ctx = ParameterCtx {
                    conn,
                    session: Some(&self.session),
                    request: req,
                    path,
                    query,
                };
                let (res, err) = if get {
                    handler.on_get_parameter(ctx).await
                } else {
                    handler.on_set_parameter(ctx).await
                };
                ((res, keep, err), false)
            }

            Method::Describe | Method::Extension(_) => {
                ((Response::new(501), keep, None), false)
            }
        }
    }

    fn not_valid(&self, req: &Request, state: SessionState) -> SessionReply {
        (
            Response::new(455),
            Some(self.session.clone()),
            Some(RtspError::MethodNotValidInState {
                method: req.method.clone(),
                state,
            }),
        )
    }

    fn set_state(&self, new: SessionState) {
        let mut state = self.session.state.lock();
        tracing::debug!(
            session_id = %self.session.secret_id,
            old_state = %*state,
            new_state = %new,
            "state transition"
        );
        *state = new;
    }

    /// Flip the connection's interleaved gate and install the per-channel
    /// callbacks once the session streams over TCP transport.
    fn enable_tcp_media(&mut self, conn: &Arc<ServerConn>) {
        let mut channels: Vec<u8> = Vec::new();
        for media in &self.medias {
            if let Some((rtp, rtcp)) = media.interleaved {
                channels.push(rtp);
                channels.push(rtcp);
            }
        }
        if channels.is_empty() {
            return;
        }

        for channel in channels {
            let activity = self.activity.clone();
            conn.install_frame_callback(
                channel,
                Box::new(move |payload: Bytes| {
                    *activity.lock() = Instant::now();
                    tracing::trace!(channel, len = payload.len(), "interleaved frame received");
                }),
            );
        }
        conn.set_allow_interleaved(true);
        self.tcp_conn = Some(conn.clone());
    }

    /// Forget a connection. Returns true when the session must close
    /// because the connection carried its TCP media transport.
    fn remove_conn(&mut self, conn: Arc<ServerConn>) -> bool {
        self.conns.retain(|c| !Arc::ptr_eq(c, &conn));
        matches!(&self.tcp_conn, Some(tc) if Arc::ptr_eq(tc, &conn))
    }
}
