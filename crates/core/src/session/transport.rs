//! Transport header negotiation (RFC 2326 §12.39).
//!
//! SETUP carries the client's transport proposal; the session parses it,
//! decides UDP vs interleaved TCP, and formats the reply. No sockets are
//! bound here — media delivery is outside the core.

/// Lower transport carrying the media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    /// `RTP/AVP` or `RTP/AVP/UDP`: media on separate UDP ports.
    Udp,
    /// `RTP/AVP/TCP`: media interleaved into the control connection.
    Tcp,
}

/// Parsed client-side `Transport` header.
///
/// ```text
/// Transport: RTP/AVP;unicast;client_port=8000-8001
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1;mode=record
/// ```
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub protocol: TransportProtocol,
    /// Client's `client_port=RTP-RTCP` pair (UDP).
    pub client_ports: Option<(u16, u16)>,
    /// Client's `interleaved=RTP-RTCP` channel pair (TCP).
    pub interleaved: Option<(u8, u8)>,
    /// `mode=record` was present (record path SETUP).
    pub record: bool,
}

impl TransportHeader {
    /// Parse the `Transport` header value. Returns `None` when the profile
    /// token is missing or no usable port/channel information is present.
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);

        let protocol = match parts.next()? {
            "RTP/AVP" | "RTP/AVP/UDP" => TransportProtocol::Udp,
            "RTP/AVP/TCP" => TransportProtocol::Tcp,
            _ => return None,
        };

        let mut client_ports = None;
        let mut interleaved = None;
        let mut record = false;

        for part in parts {
            if let Some(ports) = part.strip_prefix("client_port=") {
                client_ports = parse_pair::<u16>(ports);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                interleaved = parse_pair::<u8>(channels);
            } else if let Some(mode) = part.strip_prefix("mode=") {
                record = mode.trim_matches('"').eq_ignore_ascii_case("record");
            }
        }

        match protocol {
            TransportProtocol::Udp if client_ports.is_none() => return None,
            TransportProtocol::Tcp if interleaved.is_none() => return None,
            _ => {}
        }

        Some(TransportHeader {
            protocol,
            client_ports,
            interleaved,
            record,
        })
    }

    /// Format the server's `Transport` reply. UDP replies echo the client
    /// ports and advertise the allocated server pair; TCP replies echo the
    /// interleaved channel pair.
    pub(crate) fn reply_value(&self, server_ports: Option<(u16, u16)>) -> String {
        match self.protocol {
            TransportProtocol::Udp => {
                let (rtp, rtcp) = self.client_ports.unwrap_or((0, 0));
                match server_ports {
                    Some((srtp, srtcp)) => format!(
                        "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                        rtp, rtcp, srtp, srtcp
                    ),
                    None => format!("RTP/AVP;unicast;client_port={}-{}", rtp, rtcp),
                }
            }
            TransportProtocol::Tcp => {
                let (rtp, rtcp) = self.interleaved.unwrap_or((0, 1));
                format!("RTP/AVP/TCP;unicast;interleaved={}-{}", rtp, rtcp)
            }
        }
    }
}

fn parse_pair<T: std::str::FromStr + Copy>(value: &str) -> Option<(T, T)> {
    let (a, b) = value.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}
