//! RTSP protocol model (RFC 2326).
//!
//! This module holds the wire-level vocabulary of the server — methods,
//! headers, requests, responses, the codec that frames them on a TCP byte
//! stream, and SDP generation for DESCRIBE.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - Both peers may send requests on the same connection.
//! - Binary media frames may be interleaved into the control stream,
//!   escaped by a `$` byte (RFC 2326 §10.12); see [`codec`].

pub mod codec;
pub mod request;
pub mod response;
pub mod sdp;

pub use codec::{InterleavedFrame, Message, RtspCodec};
pub use request::Request;
pub use response::Response;

use std::fmt;

use crate::error::{ParseErrorKind, Result, RtspError};

/// RTSP request method (RFC 2326 §6.1).
///
/// Methods outside the RFC 2326 set are preserved verbatim in
/// [`Extension`](Self::Extension) and answered with 501 by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Record,
    Pause,
    Teardown,
    GetParameter,
    SetParameter,
    Extension(String),
}

impl Method {
    /// Parse a method token from a request line.
    pub fn from_token(token: &str) -> Method {
        match token {
            "OPTIONS" => Method::Options,
            "DESCRIBE" => Method::Describe,
            "ANNOUNCE" => Method::Announce,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "RECORD" => Method::Record,
            "PAUSE" => Method::Pause,
            "TEARDOWN" => Method::Teardown,
            "GET_PARAMETER" => Method::GetParameter,
            "SET_PARAMETER" => Method::SetParameter,
            other => Method::Extension(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Record => "RECORD",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
            Method::Extension(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RTSP header collection.
///
/// Names are stored as received (case-preserving) and may repeat; lookups
/// are case-insensitive per RFC 2326 §4.2. [`get`](Self::get) follows the
/// CSeq/Session uniqueness rule: a value is returned only when exactly one
/// is present.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers { entries: Vec::new() }
    }

    /// Parse header lines (everything between the first line and the blank
    /// line of a message).
    pub(crate) fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon].trim().to_string();
            let value = line[colon + 1..].trim().to_string();
            headers.entries.push((name, value));
        }
        Ok(headers)
    }

    /// Returns the value of `name` when exactly one is present.
    pub fn get(&self, name: &str) -> Option<&str> {
        let found = self.get_all(name);
        match found.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    /// Returns every value of `name`, in order of appearance.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.get_all(name).is_empty()
    }

    /// Append a value, keeping any existing ones.
    pub fn add(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Replace every value of `name` with a single value.
    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Replace every value of `name` with the given list.
    pub fn replace_all(&mut self, name: &str, values: Vec<String>) {
        self.remove(name);
        for value in values {
            self.entries.push((name.to_string(), value));
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Canonical reason phrase for an RTSP status code (RFC 2326 §7.1.1).
pub(crate) fn status_reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        301 => "Moved Permanently",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Extract (path, query) from a request URL.
///
/// The path is returned without its leading slash; the query is the raw
/// string after `?`, or empty.
pub(crate) fn path_and_query(url: &url::Url) -> (String, String) {
    let path = url.path().trim_start_matches('/').to_string();
    let query = url.query().unwrap_or("").to_string();
    (path, query)
}

/// Whether a raw query string contains `key`, with or without a value.
pub(crate) fn query_has_key(query: &str, key: &str) -> bool {
    query
        .split('&')
        .any(|pair| pair.split('=').next() == Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trip() {
        assert_eq!(Method::from_token("SETUP"), Method::Setup);
        assert_eq!(Method::Setup.as_str(), "SETUP");
        assert_eq!(Method::from_token("GET_PARAMETER"), Method::GetParameter);
    }

    #[test]
    fn unknown_method_is_preserved() {
        let m = Method::from_token("FOO_BAR");
        assert_eq!(m, Method::Extension("FOO_BAR".to_string()));
        assert_eq!(m.as_str(), "FOO_BAR");
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let mut h = Headers::new();
        h.add("CSeq", "42");
        assert_eq!(h.get("cseq"), Some("42"));
        assert_eq!(h.get("CSEQ"), Some("42"));
    }

    #[test]
    fn get_requires_exactly_one_value() {
        let mut h = Headers::new();
        assert_eq!(h.get("Session"), None);
        h.add("Session", "a");
        assert_eq!(h.get("Session"), Some("a"));
        h.add("session", "b");
        assert_eq!(h.get("Session"), None, "two values must count as absent");
        assert_eq!(h.get_all("Session"), vec!["a", "b"]);
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.add("Public", "OPTIONS");
        h.add("public", "DESCRIBE");
        h.set("Public", "TEARDOWN");
        assert_eq!(h.get_all("Public"), vec!["TEARDOWN"]);
    }

    #[test]
    fn query_key_detection() {
        assert!(query_has_key("vlcmulticast", "vlcmulticast"));
        assert!(query_has_key("a=1&vlcmulticast&b=2", "vlcmulticast"));
        assert!(query_has_key("vlcmulticast=yes", "vlcmulticast"));
        assert!(!query_has_key("vlc=multicast", "vlcmulticast"));
        assert!(!query_has_key("", "vlcmulticast"));
    }

    #[test]
    fn path_and_query_split() {
        let url = url::Url::parse("rtsp://h:8554/cam/stream?vlcmulticast").unwrap();
        let (path, query) = path_and_query(&url);
        assert_eq!(path, "cam/stream");
        assert_eq!(query, "vlcmulticast");
    }
}
