//! Error types for the RTSP server core.

use std::fmt;

use crate::protocol::Method;
use crate::session::SessionState;

/// Errors that can occur in the RTSP server core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Framing**: [`Parse`](Self::Parse), [`UnexpectedResponse`](Self::UnexpectedResponse),
///   [`UnexpectedFrame`](Self::UnexpectedFrame) — the byte stream can no
///   longer be trusted.
/// - **Request discipline**: [`CSeqMissing`](Self::CSeqMissing),
///   [`InvalidPath`](Self::InvalidPath) — answered with 400, connection
///   keeps running.
/// - **Session coupling**: [`LinkedToOtherSession`](Self::LinkedToOtherSession),
///   [`SessionNotFound`](Self::SessionNotFound),
///   [`MethodNotValidInState`](Self::MethodNotValidInState).
/// - **Lifecycle**: [`Terminated`](Self::Terminated),
///   [`SessionTimedOut`](Self::SessionTimedOut),
///   [`SessionTornDown`](Self::SessionTornDown),
///   [`LinkedConnectionClosed`](Self::LinkedConnectionClosed).
/// - **Transport**: [`Io`](Self::Io), [`ConnectionClosed`](Self::ConnectionClosed).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Failed to parse an RTSP message or interleaved frame (RFC 2326 §6, §10.12).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A Response arrived on a server-side connection.
    #[error("unexpected RTSP response received")]
    UnexpectedResponse,

    /// An interleaved frame arrived while the session was not in a
    /// Play/Record state with TCP transport.
    #[error("unexpected interleaved frame received")]
    UnexpectedFrame,

    /// The request did not carry exactly one CSeq header value.
    #[error("CSeq is missing")]
    CSeqMissing,

    /// The request did not carry a valid URL.
    #[error("invalid path")]
    InvalidPath,

    /// The connection is already driving a different session.
    #[error("connection is linked to another session")]
    LinkedToOtherSession,

    /// No session with the presented ID exists in the server's table.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The method is not allowed in the session's current state (RFC 2326 §11.3.6).
    #[error("method {method} not valid in state {state}")]
    MethodNotValidInState { method: Method, state: SessionState },

    /// The session went idle past the configured session timeout.
    #[error("session timed out")]
    SessionTimedOut,

    /// The session was destroyed by an explicit TEARDOWN.
    #[error("session torn down")]
    SessionTornDown,

    /// The connection carrying the session's TCP media transport dropped.
    #[error("connection with TCP media transport closed")]
    LinkedConnectionClosed,

    /// The server was closed.
    #[error("terminated")]
    Terminated,

    /// Error reported by the application handler; terminates the connection.
    #[error("handler error: {0}")]
    Handler(String),
}

impl RtspError {
    /// Whether the connection event loop must terminate on this error.
    ///
    /// Non-fatal errors have already produced their 4xx reply; the
    /// connection keeps serving requests. Everything that corrupts framing,
    /// comes from the socket, or was signaled by the handler is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RtspError::CSeqMissing
                | RtspError::InvalidPath
                | RtspError::LinkedToOtherSession
                | RtspError::SessionNotFound(_)
                | RtspError::MethodNotValidInState { .. }
        )
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request or status line).
    EmptyMessage,
    /// Request line did not have the `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Header section was not valid UTF-8.
    InvalidEncoding,
    /// The header section exceeded the size cap without a terminating blank line.
    HeaderSectionTooLarge,
    /// Content-Length was present but not a number.
    InvalidContentLength,
    /// Content-Length exceeded the body size cap.
    BodyTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidEncoding => write!(f, "header section is not valid UTF-8"),
            Self::HeaderSectionTooLarge => write!(f, "header section too large"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::BodyTooLarge => write!(f, "body too large"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_errors_are_not_fatal() {
        assert!(!RtspError::CSeqMissing.is_fatal());
        assert!(!RtspError::InvalidPath.is_fatal());
        assert!(!RtspError::LinkedToOtherSession.is_fatal());
        assert!(!RtspError::SessionNotFound("x".into()).is_fatal());
        assert!(!RtspError::MethodNotValidInState {
            method: Method::Play,
            state: SessionState::Initial,
        }
        .is_fatal());
    }

    #[test]
    fn framing_and_lifecycle_errors_are_fatal() {
        assert!(RtspError::UnexpectedFrame.is_fatal());
        assert!(RtspError::UnexpectedResponse.is_fatal());
        assert!(RtspError::Terminated.is_fatal());
        assert!(RtspError::ConnectionClosed.is_fatal());
        assert!(RtspError::Handler("refused".into()).is_fatal());
    }
}
