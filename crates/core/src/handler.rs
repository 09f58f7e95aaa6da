//! The application-facing handler surface.
//!
//! Applications implement [`ServerHandler`] with whatever subset of
//! callbacks they need and declare that subset in [`Capabilities`]. The
//! capability set drives the OPTIONS `Public:` advertisement and gates
//! method dispatch: a method whose capability is unset answers 501 before
//! any session is touched.
//!
//! Method callbacks return `(Response, Option<RtspError>)`. The response is
//! always written (after the dispatcher stamps `CSeq` and `Server`); a
//! returned error is the signal to terminate the connection afterwards.

use std::sync::Arc;

use async_trait::async_trait;

use crate::conn::ServerConn;
use crate::error::RtspError;
use crate::protocol::{Request, Response};
use crate::session::transport::TransportHeader;
use crate::session::ServerSession;
use crate::stream::ServerStream;

/// The set of method callbacks an application implements.
///
/// GET_PARAMETER and TEARDOWN are always advertised and always served
/// (keepalive default / session destruction), so they need no entry for
/// advertisement purposes; `get_parameter`/`set_parameter` control whether
/// the corresponding callback is invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub describe: bool,
    pub announce: bool,
    pub setup: bool,
    pub play: bool,
    pub record: bool,
    pub pause: bool,
    pub get_parameter: bool,
    pub set_parameter: bool,
}

impl Capabilities {
    /// The `Public:` header value: implemented methods plus the always-on
    /// GET_PARAMETER and TEARDOWN, in protocol order.
    pub(crate) fn public_methods(&self) -> String {
        let mut methods: Vec<&str> = Vec::new();
        if self.describe {
            methods.push("DESCRIBE");
        }
        if self.announce {
            methods.push("ANNOUNCE");
        }
        if self.setup {
            methods.push("SETUP");
        }
        if self.play {
            methods.push("PLAY");
        }
        if self.record {
            methods.push("RECORD");
        }
        if self.pause {
            methods.push("PAUSE");
        }
        methods.push("GET_PARAMETER");
        if self.set_parameter {
            methods.push("SET_PARAMETER");
        }
        methods.push("TEARDOWN");
        methods.join(", ")
    }
}

/// Context for [`ServerHandler::on_describe`].
pub struct DescribeCtx<'a> {
    pub conn: &'a Arc<ServerConn>,
    pub request: &'a Request,
    /// Request path without its leading slash.
    pub path: String,
    /// Raw query string, empty when absent.
    pub query: String,
}

/// Context for [`ServerHandler::on_announce`].
pub struct AnnounceCtx<'a> {
    pub conn: &'a Arc<ServerConn>,
    pub session: &'a Arc<ServerSession>,
    pub request: &'a Request,
    pub path: String,
    pub query: String,
}

/// Context for [`ServerHandler::on_setup`].
pub struct SetupCtx<'a> {
    pub conn: &'a Arc<ServerConn>,
    pub session: &'a Arc<ServerSession>,
    pub request: &'a Request,
    pub path: String,
    pub query: String,
    /// Parsed client Transport header.
    pub transport: &'a TransportHeader,
}

/// Context for [`ServerHandler::on_play`].
pub struct PlayCtx<'a> {
    pub conn: &'a Arc<ServerConn>,
    pub session: &'a Arc<ServerSession>,
    pub request: &'a Request,
    pub path: String,
    pub query: String,
}

/// Context for [`ServerHandler::on_record`].
pub struct RecordCtx<'a> {
    pub conn: &'a Arc<ServerConn>,
    pub session: &'a Arc<ServerSession>,
    pub request: &'a Request,
    pub path: String,
    pub query: String,
}

/// Context for [`ServerHandler::on_pause`].
pub struct PauseCtx<'a> {
    pub conn: &'a Arc<ServerConn>,
    pub session: &'a Arc<ServerSession>,
    pub request: &'a Request,
    pub path: String,
    pub query: String,
}

/// Context for [`ServerHandler::on_get_parameter`] /
/// [`ServerHandler::on_set_parameter`]. `session` is present when the
/// request carried a Session header and was routed through the session.
pub struct ParameterCtx<'a> {
    pub conn: &'a Arc<ServerConn>,
    pub session: Option<&'a Arc<ServerSession>>,
    pub request: &'a Request,
    pub path: String,
    pub query: String,
}

/// Application callbacks. Every method has a default implementation, so a
/// handler implements only what it declares in
/// [`capabilities`](Self::capabilities).
#[async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// Which method callbacks are implemented. Drives dispatch gating and
    /// the OPTIONS `Public:` advertisement.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// A connection was accepted.
    async fn on_conn_open(&self, _conn: &Arc<ServerConn>) {}

    /// A connection terminated; `err` is the terminal error
    /// (e.g. closed by peer, terminated on shutdown).
    async fn on_conn_close(&self, _conn: &Arc<ServerConn>, _err: &RtspError) {}

    /// A session was created by ANNOUNCE or SETUP.
    async fn on_session_open(&self, _session: &Arc<ServerSession>) {}

    /// A session was destroyed; `err` is the reason (torn down, timed out,
    /// linked connection closed, terminated).
    async fn on_session_close(&self, _session: &Arc<ServerSession>, _err: &RtspError) {}

    /// Called for every request before dispatch.
    fn on_request(&self, _conn: &Arc<ServerConn>, _req: &Request) {}

    /// Called for every response after the dispatcher finished building it.
    fn on_response(&self, _conn: &Arc<ServerConn>, _res: &Response) {}

    async fn on_describe(
        &self,
        _ctx: DescribeCtx<'_>,
    ) -> (Response, Option<Arc<ServerStream>>, Option<RtspError>) {
        (Response::new(501), None, None)
    }

    async fn on_announce(&self, _ctx: AnnounceCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::new(501), None)
    }

    async fn on_setup(&self, _ctx: SetupCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::new(501), None)
    }

    async fn on_play(&self, _ctx: PlayCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::new(501), None)
    }

    async fn on_record(&self, _ctx: RecordCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::new(501), None)
    }

    async fn on_pause(&self, _ctx: PauseCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::new(501), None)
    }

    async fn on_get_parameter(&self, _ctx: ParameterCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::new(501), None)
    }

    async fn on_set_parameter(&self, _ctx: ParameterCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::new(501), None)
    }
}
