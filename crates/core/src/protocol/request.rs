use bytes::Bytes;
use url::Url;

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::{path_and_query, Headers, Method};

/// A parsed RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// The URL is `None` for `OPTIONS *` and for URIs that do not parse; the
/// dispatcher rejects the latter with 400 for every method except OPTIONS.
#[derive(Debug, Clone)]
pub struct Request {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, ...).
    pub method: Method,
    /// Request-URI (e.g. `rtsp://host:8554/stream`).
    pub url: Option<Url>,
    /// Headers as received. Lookups are case-insensitive.
    pub headers: Headers,
    /// Message body (`Content-Length` bytes after the blank line).
    pub body: Bytes,
}

impl Request {
    /// Parse a request from its header section and body.
    ///
    /// `head` is the text up to (not including) the terminating blank line.
    pub(crate) fn parse(head: &str, body: Bytes) -> Result<Self> {
        let mut lines = head.lines();

        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 || !parts[2].starts_with("RTSP/") {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = Method::from_token(parts[0]);
        let url = match parts[1] {
            "*" => None,
            uri => Url::parse(uri).ok(),
        };

        let headers = Headers::parse(lines)?;

        Ok(Request {
            method,
            url,
            headers,
            body,
        })
    }

    /// Returns the CSeq header value when exactly one is present
    /// (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.headers.get("CSeq")
    }

    /// Returns the session ID from the Session header, with any parameters
    /// (`;timeout=...`) stripped. Absent unless exactly one value is present.
    pub fn session_id(&self) -> Option<&str> {
        self.headers
            .get("Session")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    /// The (path, query) pair of the request URL, both empty when the URL
    /// is absent. The path loses its leading slash.
    pub fn path_and_query(&self) -> (String, String) {
        self.url.as_ref().map(path_and_query).unwrap_or_default()
    }
}
