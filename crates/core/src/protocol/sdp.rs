//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- 0 0 IN IP4 127.0.0.1                     ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 0.0.0.0                              ← connection address
//! t=0 0                                         ← timing (live stream)
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1                ← codec parameters
//! a=control:trackID=0                           ← track control URL
//! ```
//!
//! Control attributes are always rewritten server-side to `trackID=<index>`
//! so that clients which assume numeric track IDs (e.g. the Grandstream
//! GXV3500) can address tracks; whatever the application supplied is
//! discarded. A multicast marshal variant substitutes the connection
//! address, which makes VLC switch to multicast reception.

use std::fmt;
use std::net::Ipv4Addr;

/// Top-level media kind for the `m=` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Application,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Application => write!(f, "application"),
        }
    }
}

/// One payload format of a media (RFC 4566 §6: rtpmap / fmtp attributes).
#[derive(Debug, Clone)]
pub struct MediaFormat {
    /// RTP payload type (dynamic range is 96-127).
    pub payload_type: u8,
    /// `a=rtpmap` value without the payload type, e.g. `H264/90000`.
    pub rtpmap: Option<String>,
    /// `a=fmtp` value without the payload type, e.g. `packetization-mode=1`.
    pub fmtp: Option<String>,
}

/// One track within a stream description.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub kind: MediaKind,
    /// Application-supplied control value. Replaced server-side with
    /// `trackID=<index>` before marshaling.
    pub control: String,
    pub formats: Vec<MediaFormat>,
}

/// A complete stream description, returned by the DESCRIBE handler via
/// [`ServerStream`](crate::ServerStream).
#[derive(Debug, Clone)]
pub struct StreamDescription {
    /// SDP session name (`s=` line).
    pub title: String,
    pub medias: Vec<MediaDescription>,
    /// Forward-error-correction groupings (RFC 8854), each a list of media
    /// identifiers, marshaled as `a=group:FEC-FR` lines.
    pub fec_groups: Vec<Vec<String>>,
}

impl StreamDescription {
    pub fn new(title: &str, medias: Vec<MediaDescription>) -> Self {
        StreamDescription {
            title: title.to_string(),
            medias,
            fec_groups: Vec::new(),
        }
    }

    /// Marshal to SDP text. `multicast` substitutes the connection address
    /// with the given multicast address (TTL 127).
    pub(crate) fn marshal(&self, multicast: Option<Ipv4Addr>) -> String {
        let mut sdp: Vec<String> = Vec::new();

        sdp.push("v=0".to_string());
        sdp.push("o=- 0 0 IN IP4 127.0.0.1".to_string());
        sdp.push(format!(
            "s={}",
            if self.title.is_empty() { "Stream" } else { &self.title }
        ));
        match multicast {
            Some(addr) => sdp.push(format!("c=IN IP4 {}/127", addr)),
            None => sdp.push("c=IN IP4 0.0.0.0".to_string()),
        }
        sdp.push("t=0 0".to_string());
        for group in &self.fec_groups {
            sdp.push(format!("a=group:FEC-FR {}", group.join(" ")));
        }

        for media in &self.medias {
            let payload_types: Vec<String> = media
                .formats
                .iter()
                .map(|f| f.payload_type.to_string())
                .collect();
            sdp.push(format!(
                "m={} 0 RTP/AVP {}",
                media.kind,
                payload_types.join(" ")
            ));
            for format in &media.formats {
                if let Some(rtpmap) = &format.rtpmap {
                    sdp.push(format!("a=rtpmap:{} {}", format.payload_type, rtpmap));
                }
                if let Some(fmtp) = &format.fmtp {
                    sdp.push(format!("a=fmtp:{} {}", format.payload_type, fmtp));
                }
            }
            sdp.push(format!("a=control:{}", media.control));
        }

        format!("{}\r\n", sdp.join("\r\n"))
    }
}

/// Clone a description with every control attribute normalized to
/// `trackID=<index>`, irrespective of what the application described.
pub(crate) fn server_side_description(desc: &StreamDescription) -> StreamDescription {
    StreamDescription {
        title: desc.title.clone(),
        fec_groups: desc.fec_groups.clone(),
        medias: desc
            .medias
            .iter()
            .enumerate()
            .map(|(i, media)| MediaDescription {
                kind: media.kind,
                control: format!("trackID={}", i),
                formats: media.formats.clone(),
            })
            .collect(),
    }
}

/// First host address of a `a.b.c.d/len` multicast range, used as the
/// advertised multicast connection address.
pub(crate) fn multicast_base(range: &str) -> Option<Ipv4Addr> {
    let (addr, len) = range.split_once('/')?;
    let addr: Ipv4Addr = addr.trim().parse().ok()?;
    let len: u32 = len.trim().parse().ok()?;
    if len > 32 || !addr.is_multicast() {
        return None;
    }
    let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    let network = u32::from(addr) & mask;
    let first = if len >= 31 { network } else { network + 1 };
    Some(Ipv4Addr::from(first))
}
