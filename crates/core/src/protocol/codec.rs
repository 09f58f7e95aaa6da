//! Wire framing for the RTSP control stream.
//!
//! One connection carries two interleaved kinds of traffic (RFC 2326 §10.12):
//!
//! - text messages (requests and responses), delimited by a blank line and
//!   an optional `Content-Length` body;
//! - binary interleaved frames, escaped by a `$` byte followed by a channel
//!   byte and a big-endian u16 payload length.
//!
//! [`RtspCodec`] discriminates on the first byte of each unit and yields a
//! [`Message`]. Any framing failure is fatal for the connection.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::{Request, Response};

/// Escape byte introducing an interleaved frame.
const INTERLEAVED_MAGIC: u8 = b'$';

/// Interleaved frame header: magic + channel + u16 length.
const INTERLEAVED_HEADER_LEN: usize = 4;

/// Cap on the header section of a text message.
const MAX_HEADER_BYTES: usize = 4096;

/// Cap on `Content-Length` (SDP bodies are small; parameter bodies modest).
const MAX_BODY_BYTES: usize = 128 * 1024;

/// A binary media frame embedded in the control stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedFrame {
    pub channel: u8,
    pub payload: Bytes,
}

/// One framed unit read from the connection.
#[derive(Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
    Interleaved(InterleavedFrame),
}

/// Tokio codec producing [`Message`]s and serializing [`Response`]s.
#[derive(Debug, Default)]
pub struct RtspCodec;

impl Decoder for RtspCodec {
    type Item = Message;
    type Error = RtspError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] == INTERLEAVED_MAGIC {
            decode_interleaved(src)
        } else {
            decode_text(src)
        }
    }
}

impl Encoder<Response> for RtspCodec {
    type Error = RtspError;

    fn encode(&mut self, res: Response, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&res.serialize());
        Ok(())
    }
}

fn decode_interleaved(src: &mut BytesMut) -> Result<Option<Message>> {
    if src.len() < INTERLEAVED_HEADER_LEN {
        return Ok(None);
    }
    let channel = src[1];
    let len = u16::from_be_bytes([src[2], src[3]]) as usize;
    if src.len() < INTERLEAVED_HEADER_LEN + len {
        src.reserve(INTERLEAVED_HEADER_LEN + len - src.len());
        return Ok(None);
    }
    src.advance(INTERLEAVED_HEADER_LEN);
    let payload = src.split_to(len).freeze();
    Ok(Some(Message::Interleaved(InterleavedFrame {
        channel,
        payload,
    })))
}

fn decode_text(src: &mut BytesMut) -> Result<Option<Message>> {
    let head_len = match find_blank_line(src) {
        Some(pos) => pos,
        None if src.len() > MAX_HEADER_BYTES => {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::HeaderSectionTooLarge,
            });
        }
        None => return Ok(None),
    };
    if head_len > MAX_HEADER_BYTES {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::HeaderSectionTooLarge,
        });
    }

    let head = std::str::from_utf8(&src[..head_len]).map_err(|_| RtspError::Parse {
        kind: ParseErrorKind::InvalidEncoding,
    })?;

    let body_len = content_length(head)?;
    if body_len > MAX_BODY_BYTES {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::BodyTooLarge,
        });
    }

    let total = head_len + 4 + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let head_bytes = src.split_to(head_len);
    src.advance(4);
    let body = src.split_to(body_len).freeze();

    // Validated as UTF-8 above.
    let head = std::str::from_utf8(&head_bytes).map_err(|_| RtspError::Parse {
        kind: ParseErrorKind::InvalidEncoding,
    })?;

    if head.starts_with("RTSP/") {
        Ok(Some(Message::Response(Response::parse(head, body)?)))
    } else {
        Ok(Some(Message::Request(Request::parse(head, body)?)))
    }
}

/// Position of the `\r\n\r\n` header terminator, i.e. the header length.
fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Extract `Content-Length` from a raw header section. Zero when absent.
fn content_length(head: &str) -> Result<usize> {
    for line in head.lines().skip(1) {
        if let Some(colon) = line.find(':') {
            if line[..colon].trim().eq_ignore_ascii_case("content-length") {
                return line[colon + 1..].trim().parse().map_err(|_| RtspError::Parse {
                    kind: ParseErrorKind::InvalidContentLength,
                });
            }
        }
    }
    Ok(0)
}
