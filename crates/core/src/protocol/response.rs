use bytes::Bytes;

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::{status_reason, Headers};

/// An RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Builder style: chain [`with_header`](Self::with_header) and
/// [`with_body`](Self::with_body). `Content-Length` is computed during
/// serialization when a body is present. The `CSeq` and `Server` headers
/// are stamped by the connection dispatcher, not here.
#[must_use]
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    /// Create a response with the canonical reason phrase for `status`.
    pub fn new(status: u16) -> Self {
        Response {
            status,
            reason: status_reason(status).to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// 200 OK — success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize to the RTSP text wire format, appending `Content-Length`
    /// when a body is present (RFC 2326 §12.14).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(format!("RTSP/1.0 {} {}\r\n", self.status, self.reason).as_bytes());
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        if !self.body.is_empty() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a response from its header section and body.
    ///
    /// The server core never acts on responses (receiving one is a protocol
    /// error), but the codec must still recognize and consume them.
    pub(crate) fn parse(head: &str, body: Bytes) -> Result<Self> {
        let mut lines = head.lines();

        let status_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        let reason = parts.next().unwrap_or("").to_string();

        let status = match (version.starts_with("RTSP/"), code) {
            (true, Some(code)) => code,
            _ => {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::InvalidStatusLine,
                })
            }
        };

        let headers = Headers::parse(lines)?;

        Ok(Response {
            status,
            reason,
            headers,
            body,
        })
    }
}
