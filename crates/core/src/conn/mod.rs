//! Per-connection state machine.
//!
//! Each accepted socket gets two tasks: a reader ([`reader::ConnReader`])
//! and the event loop in this module. The loop is strictly sequential —
//! one request in flight at a time, replies in wire order — and selects
//! over four event sources: requests from the reader, read errors,
//! session-detach notifications, and cancellation.
//!
//! The dispatcher enforces the header discipline every response must obey:
//! the request's CSeq echoed verbatim (absent only when the request had no
//! well-formed CSeq), and a `Server` header on everything.

pub(crate) mod reader;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RtspError};
use crate::handler::{DescribeCtx, ParameterCtx};
use crate::protocol::sdp::server_side_description;
use crate::protocol::{query_has_key, Method, Request, Response};
use crate::server::ServerInner;
use crate::session::ServerSession;
use crate::transport::framed::{split_framed, FrameWriter, MaybeTlsStream};
use reader::{ConnReader, FrameCallback, ReadRequest, ReaderState};

/// A server-side RTSP connection.
///
/// The public handle shared with handler callbacks and sessions; the
/// event loop and socket live in this module's tasks.
pub struct ServerConn {
    remote_addr: SocketAddr,
    token: CancellationToken,
    bytes_received: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    user_data: Mutex<Option<Box<dyn Any + Send>>>,
    reader_state: Arc<Mutex<ReaderState>>,
    remove_tx: mpsc::Sender<Arc<ServerSession>>,
}

impl ServerConn {
    /// Close the connection. The event loop observes the cancellation and
    /// unwinds: socket closed, reader joined, session detached.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Address of the peer (IP and port).
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Total bytes read from the peer.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Total bytes written to the peer.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Attach opaque user data to the connection.
    pub fn set_user_data(&self, data: Box<dyn Any + Send>) {
        *self.user_data.lock() = Some(data);
    }

    /// Remove and return previously attached user data.
    pub fn take_user_data(&self) -> Option<Box<dyn Any + Send>> {
        self.user_data.lock().take()
    }

    /// Session fan-out: tell this connection its bound session is gone.
    /// Falls through silently when the connection is already closing.
    pub(crate) async fn notify_session_removed(&self, session: &Arc<ServerSession>) {
        tokio::select! {
            _ = self.remove_tx.send(session.clone()) => {}
            _ = self.token.cancelled() => {}
        }
    }

    pub(crate) fn set_allow_interleaved(&self, allow: bool) {
        self.reader_state.lock().allow_interleaved_frames = allow;
    }

    pub(crate) fn install_frame_callback(&self, channel: u8, callback: FrameCallback) {
        self.reader_state.lock().callbacks.insert(channel, callback);
    }

    fn set_read_deadline_armed(&self, armed: bool) {
        self.reader_state.lock().deadline_armed = armed;
    }

    fn reset_media_state(&self) {
        let mut state = self.reader_state.lock();
        state.allow_interleaved_frames = false;
        state.callbacks.clear();
    }
}

/// Accept-side entry point: drives the whole connection lifecycle.
pub(crate) async fn run_conn(socket: TcpStream, server: Arc<ServerInner>) {
    let remote_addr = match socket.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };

    let token = server.token().child_token();
    let bytes_received = Arc::new(AtomicU64::new(0));
    let bytes_sent = Arc::new(AtomicU64::new(0));
    let reader_state = Arc::new(Mutex::new(ReaderState::new()));
    let (req_tx, req_rx) = mpsc::channel(1);
    let (err_tx, err_rx) = mpsc::channel(1);
    let (remove_tx, remove_rx) = mpsc::channel(1);

    let conn = Arc::new(ServerConn {
        remote_addr,
        token: token.clone(),
        bytes_received: bytes_received.clone(),
        bytes_sent: bytes_sent.clone(),
        user_data: Mutex::new(None),
        reader_state: reader_state.clone(),
        remove_tx,
    });

    server.register_conn(&conn);
    tracing::info!(peer_addr = %remote_addr, "client connected");
    server.handler().on_conn_open(&conn).await;

    let stream = match server.tls_config() {
        Some(config) => match TlsAcceptor::from(config).accept(socket).await {
            Ok(tls) => MaybeTlsStream::Tls(Box::new(tls)),
            Err(e) => {
                let err = RtspError::Io(e);
                finish_conn(&server, &conn, remote_addr, &err).await;
                return;
            }
        },
        None => MaybeTlsStream::Plain(socket),
    };

    let (frame_reader, writer) = split_framed(
        stream,
        bytes_received,
        bytes_sent,
        server.read_timeout(),
        server.write_timeout(),
    );

    let conn_reader = ConnReader::new(
        frame_reader,
        reader_state,
        req_tx,
        err_tx,
        token.clone(),
    );
    let reader_handle = tokio::spawn(conn_reader.run());

    let mut task = ConnTask {
        server: server.clone(),
        conn: conn.clone(),
        writer,
        req_rx,
        err_rx,
        remove_rx,
        session: None,
    };
    let err = task.run_inner().await;

    token.cancel();
    let session = task.session.take();
    drop(task); // closes the write half and the reader-facing channels
    let _ = reader_handle.await;

    if let Some(session) = session {
        session.remove_conn(conn.clone()).await;
    }
    finish_conn(&server, &conn, remote_addr, &err).await;
}

async fn finish_conn(
    server: &Arc<ServerInner>,
    conn: &Arc<ServerConn>,
    remote_addr: SocketAddr,
    err: &RtspError,
) {
    server.remove_conn(conn);
    server.handler().on_conn_close(conn, err).await;
    tracing::info!(peer_addr = %remote_addr, reason = %err, "client disconnected");
}

/// The event-loop task owning the write half and the session binding.
struct ConnTask {
    server: Arc<ServerInner>,
    conn: Arc<ServerConn>,
    writer: FrameWriter,
    req_rx: mpsc::Receiver<ReadRequest>,
    err_rx: mpsc::Receiver<RtspError>,
    remove_rx: mpsc::Receiver<Arc<ServerSession>>,
    session: Option<Arc<ServerSession>>,
}

impl ConnTask {
    async fn run_inner(&mut self) -> RtspError {
        loop {
            tokio::select! {
                read_req = self.req_rx.recv() => match read_req {
                    Some(read_req) => {
                        let result = self.handle_request_outer(read_req.req).await;
                        let _ = read_req.ack.send(result);
                    }
                    None => return RtspError::Terminated,
                },

                err = self.err_rx.recv() => match err {
                    Some(err) => return err,
                    None => return RtspError::Terminated,
                },

                removed = self.remove_rx.recv() => {
                    if let Some(session) = removed {
                        let bound = matches!(
                            &self.session,
                            Some(current) if Arc::ptr_eq(current, &session)
                        );
                        if bound {
                            self.session = None;
                            self.conn.reset_media_state();
                            self.conn.set_read_deadline_armed(true);
                        }
                    }
                }

                _ = self.conn.token.cancelled() => return RtspError::Terminated,
            }
        }
    }

    /// Serve one request end to end: hooks, dispatch, header discipline,
    /// write. The returned error, if fatal, terminates the connection via
    /// the reader's acknowledgment path.
    async fn handle_request_outer(&mut self, req: Request) -> Result<()> {
        self.server.handler().on_request(&self.conn, &req);
        tracing::debug!(
            peer_addr = %self.conn.remote_addr,
            method = %req.method,
            "request"
        );

        let (mut res, err) = self.handle_request_inner(&req).await;

        // CSeq is echoed verbatim on everything except the one failure mode
        // where the request had no well-formed CSeq to echo.
        if !matches!(err, Some(RtspError::CSeqMissing)) {
            let cseq: Vec<String> = req
                .headers
                .get_all("CSeq")
                .into_iter()
                .map(str::to_string)
                .collect();
            res.headers.replace_all("CSeq", cseq);
        }
        res.headers.set("Server", self.server.server_agent());

        self.server.handler().on_response(&self.conn, &res);
        tracing::debug!(
            peer_addr = %self.conn.remote_addr,
            status = res.status,
            "response"
        );

        let write_result = self.writer.write_response(res).await;

        // While a session is bound, liveness is the session's business.
        self.conn.set_read_deadline_armed(self.session.is_none());

        let err = match (err, write_result) {
            (None, Err(write_err)) => Some(write_err),
            (err, _) => err,
        };
        match err {
            None => Ok(()),
            Some(e) if e.is_fatal() => Err(e),
            Some(e) => {
                tracing::debug!(peer_addr = %self.conn.remote_addr, error = %e, "request rejected");
                Ok(())
            }
        }
    }

    async fn handle_request_inner(&mut self, req: &Request) -> (Response, Option<RtspError>) {
        if req.headers.get("CSeq").is_none() {
            return (Response::new(400), Some(RtspError::CSeqMissing));
        }
        if req.method != Method::Options && req.url.is_none() {
            return (Response::new(400), Some(RtspError::InvalidPath));
        }

        let sx_id = req.session_id().unwrap_or("").to_string();
        let caps = self.server.handler().capabilities();

        match &req.method {
            Method::Options => {
                if !sx_id.is_empty() {
                    return self.route_to_session(req, &sx_id, false).await;
                }
                (
                    Response::ok().with_header("Public", &caps.public_methods()),
                    None,
                )
            }

            Method::Describe if caps.describe => {
                let url = match req.url.as_ref() {
                    Some(url) => url,
                    None => return (Response::new(400), Some(RtspError::InvalidPath)),
                };
                let (path, query) = req.path_and_query();
                let (mut res, stream, err) = self
                    .server
                    .handler()
                    .on_describe(DescribeCtx {
                        conn: &self.conn,
                        request: req,
                        path,
                        query: query.clone(),
                    })
                    .await;

                if res.status == 200 {
                    res.headers
                        .set("Content-Base", &format!("{}/", url.as_str()));
                    res.headers.set("Content-Type", "application/sdp");

                    // VLC switches to multicast reception when the SDP
                    // carries a multicast address; the vlcmulticast query
                    // opts a client in, provided a range is configured.
                    let multicast = if query_has_key(&query, "vlcmulticast") {
                        self.server.multicast_base()
                    } else {
                        None
                    };

                    if let Some(stream) = stream {
                        res.body = Bytes::from(
                            server_side_description(stream.description()).marshal(multicast),
                        );
                    }
                }
                (res, err)
            }

            Method::Announce if caps.announce => self.route_to_session(req, &sx_id, true).await,

            Method::Setup if caps.setup => self.route_to_session(req, &sx_id, true).await,

            Method::Play if caps.play && !sx_id.is_empty() => {
                self.route_to_session(req, &sx_id, false).await
            }

            Method::Record if caps.record && !sx_id.is_empty() => {
                self.route_to_session(req, &sx_id, false).await
            }

            Method::Pause if caps.pause && !sx_id.is_empty() => {
                self.route_to_session(req, &sx_id, false).await
            }

            Method::Teardown if !sx_id.is_empty() => {
                self.route_to_session(req, &sx_id, false).await
            }

            Method::GetParameter | Method::SetParameter => {
                if !sx_id.is_empty() {
                    return self.route_to_session(req, &sx_id, false).await;
                }
                let get = req.method == Method::GetParameter;
                let capable = if get { caps.get_parameter } else { caps.set_parameter };
                if !capable {
                    return (Response::new(501), None);
                }
                let (path, query) = req.path_and_query();
                let ctx = ParameterCtx {
                    conn: &self.conn,
                    session: None,
                    request: req,
                    path,
                    query,
                };
                if get {
                    self.server.handler().on_get_parameter(ctx).await
                } else {
                    self.server.handler().on_set_parameter(ctx).await
                }
            }

            _ => (Response::new(501), None),
        }
    }

    /// Route a request into the bound session, or through the server when
    /// unbound. The reply's binding replaces the connection's own.
    async fn route_to_session(
        &mut self,
        req: &Request,
        sx_id: &str,
        create: bool,
    ) -> (Response, Option<RtspError>) {
        let (res, binding, err) = match &self.session {
            Some(current) => {
                // The Session header is optional in SETUP and ANNOUNCE on a
                // bound connection (301 retries; SETUP racing the ANNOUNCE
                // response), but a different ID is a hard error: one
                // connection cannot drive two sessions.
                if !sx_id.is_empty() && sx_id != current.secret_id() {
                    return (Response::new(400), Some(RtspError::LinkedToOtherSession));
                }
                current.handle_request(self.conn.clone(), req.clone()).await
            }
            None => {
                self.server
                    .handle_session_request(&self.conn, req.clone(), sx_id, create)
                    .await
            }
        };
        self.session = binding;
        (res, err)
    }
}
