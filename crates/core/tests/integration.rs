//! Integration tests: full RTSP exchanges over real sockets.
//!
//! Each test starts a server on an ephemeral port, connects with a raw TCP
//! client, and verifies wire-level behavior: header discipline, session
//! lifecycle, interleaved-frame gating, shutdown propagation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use rtspd::{
    AnnounceCtx, Capabilities, DescribeCtx, MediaDescription, MediaFormat, MediaKind, PauseCtx,
    PlayCtx, RecordCtx, Response, RtspError, Server, ServerConfig, ServerHandler, ServerStream,
    SetupCtx, StreamDescription,
};

/// Handler with a configurable capability set; every enabled callback
/// answers 200. Terminal connection errors are recorded for assertions.
struct TestHandler {
    caps: Capabilities,
    stream: Option<Arc<ServerStream>>,
    conn_close_errors: Mutex<Vec<String>>,
    session_close_errors: Mutex<Vec<String>>,
}

impl TestHandler {
    fn new(caps: Capabilities) -> Arc<Self> {
        Arc::new(TestHandler {
            caps,
            stream: Some(Arc::new(ServerStream::new(StreamDescription::new(
                "Test Stream",
                vec![MediaDescription {
                    kind: MediaKind::Video,
                    control: "ignored-by-server".to_string(),
                    formats: vec![MediaFormat {
                        payload_type: 96,
                        rtpmap: Some("H264/90000".to_string()),
                        fmtp: Some("packetization-mode=1".to_string()),
                    }],
                }],
            )))),
            conn_close_errors: Mutex::new(Vec::new()),
            session_close_errors: Mutex::new(Vec::new()),
        })
    }

    async fn wait_for_conn_close(&self) -> String {
        wait_for(&self.conn_close_errors, "on_conn_close").await
    }

    async fn wait_for_session_close(&self) -> String {
        wait_for(&self.session_close_errors, "on_session_close").await
    }
}

async fn wait_for(log: &Mutex<Vec<String>>, what: &str) -> String {
    for _ in 0..100 {
        if let Some(entry) = log.lock().last().cloned() {
            return entry;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("{} did not fire", what);
}

#[async_trait]
impl ServerHandler for TestHandler {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn on_conn_close(&self, _conn: &Arc<rtspd::ServerConn>, err: &RtspError) {
        self.conn_close_errors.lock().push(err.to_string());
    }

    async fn on_session_close(&self, _session: &Arc<rtspd::ServerSession>, err: &RtspError) {
        self.session_close_errors.lock().push(err.to_string());
    }

    async fn on_describe(
        &self,
        _ctx: DescribeCtx<'_>,
    ) -> (Response, Option<Arc<ServerStream>>, Option<RtspError>) {
        (Response::ok(), self.stream.clone(), None)
    }

    async fn on_announce(&self, _ctx: AnnounceCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::ok(), None)
    }

    async fn on_setup(&self, _ctx: SetupCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::ok(), None)
    }

    async fn on_play(&self, _ctx: PlayCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::ok(), None)
    }

    async fn on_record(&self, _ctx: RecordCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::ok(), None)
    }

    async fn on_pause(&self, _ctx: PauseCtx<'_>) -> (Response, Option<RtspError>) {
        (Response::ok(), None)
    }
}

async fn start_server(handler: Arc<TestHandler>) -> (Server, SocketAddr) {
    start_server_with(ServerConfig::new(handler)).await
}

async fn start_server_with(config: ServerConfig) -> (Server, SocketAddr) {
    let mut server = Server::new("127.0.0.1:0", config);
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("local addr");
    (server, addr)
}

/// Raw RTSP test client over TCP.
struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = timeout(Duration::from_secs(2), TcpStream::connect(addr))
            .await
            .expect("connect timeout")
            .expect("connect");
        TestClient {
            stream,
            buf: Vec::new(),
        }
    }

    async fn send_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.expect("write");
    }

    async fn request(&mut self, text: &str) -> String {
        self.send_raw(text.as_bytes()).await;
        self.read_response().await
    }

    async fn read_response(&mut self) -> String {
        loop {
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                let head_end = pos + 4;
                let head = String::from_utf8_lossy(&self.buf[..pos]).to_string();
                let body_len = content_length(&head);
                if self.buf.len() >= head_end + body_len {
                    let full =
                        String::from_utf8_lossy(&self.buf[..head_end + body_len]).to_string();
                    self.buf.drain(..head_end + body_len);
                    return full;
                }
            }
            let mut tmp = [0u8; 2048];
            let n = timeout(Duration::from_secs(2), self.stream.read(&mut tmp))
                .await
                .expect("response timeout")
                .expect("read");
            assert!(n > 0, "connection closed while waiting for a response");
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// Wait for the server to close the connection.
    async fn expect_eof(&mut self) {
        let mut tmp = [0u8; 256];
        loop {
            let n = timeout(Duration::from_secs(2), self.stream.read(&mut tmp))
                .await
                .expect("timed out waiting for connection close")
                .expect("read");
            if n == 0 {
                return;
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        if n.trim().eq_ignore_ascii_case(name) {
            Some(v.trim())
        } else {
            None
        }
    })
}

fn session_id(response: &str) -> String {
    header_value(response, "Session")
        .expect("Session header")
        .split(';')
        .next()
        .unwrap()
        .trim()
        .to_string()
}

#[tokio::test]
async fn options_advertises_handler_capabilities() {
    let handler = TestHandler::new(Capabilities {
        describe: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let res = client
        .request("OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n\r\n")
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
    assert_eq!(header_value(&res, "CSeq"), Some("1"));
    assert!(header_value(&res, "Server").is_some());
    assert_eq!(
        header_value(&res, "Public"),
        Some("DESCRIBE, GET_PARAMETER, TEARDOWN")
    );
}

#[tokio::test]
async fn describe_returns_sdp_with_normalized_controls() {
    let handler = TestHandler::new(Capabilities {
        describe: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam", addr);
    let res = client
        .request(&format!("DESCRIBE {} RTSP/1.0\r\nCSeq: 2\r\n\r\n", uri))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
    assert_eq!(header_value(&res, "Content-Type"), Some("application/sdp"));
    assert_eq!(
        header_value(&res, "Content-Base").map(str::to_string),
        Some(format!("{}/", uri))
    );
    assert!(res.contains("v=0\r\n"), "missing SDP body: {}", res);
    assert!(res.contains("m=video 0 RTP/AVP 96\r\n"));
    assert!(res.contains("a=rtpmap:96 H264/90000\r\n"));
    assert!(
        res.contains("a=control:trackID=0\r\n"),
        "control must be normalized: {}",
        res
    );
    assert!(!res.contains("ignored-by-server"));
}

#[tokio::test]
async fn describe_vlcmulticast_returns_multicast_address() {
    let handler = TestHandler::new(Capabilities {
        describe: true,
        ..Default::default()
    });
    let mut config = ServerConfig::new(handler);
    config.multicast_ip_range = Some("224.1.0.0/16".to_string());
    let (_server, addr) = start_server_with(config).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam?vlcmulticast", addr);
    let res = client
        .request(&format!("DESCRIBE {} RTSP/1.0\r\nCSeq: 2\r\n\r\n", uri))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
    assert!(
        res.contains("c=IN IP4 224.1.0.1/127\r\n"),
        "SDP must carry a multicast connection address: {}",
        res
    );
    assert_eq!(
        header_value(&res, "Content-Base").map(str::to_string),
        Some(format!("{}/", uri))
    );
}

#[tokio::test]
async fn missing_cseq_gets_400_without_cseq_echo() {
    let handler = TestHandler::new(Capabilities::default());
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let res = client.request("OPTIONS rtsp://h/ RTSP/1.0\r\n\r\n").await;
    assert!(res.starts_with("RTSP/1.0 400"), "got: {}", res);
    assert!(header_value(&res, "Server").is_some());
    assert!(header_value(&res, "CSeq").is_none(), "got: {}", res);

    // Not fatal: the connection still serves requests.
    let res = client
        .request("OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 2\r\n\r\n")
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"));
}

#[tokio::test]
async fn play_without_session_is_not_implemented() {
    let handler = TestHandler::new(Capabilities {
        play: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let res = client
        .request("PLAY rtsp://h/ RTSP/1.0\r\nCSeq: 3\r\n\r\n")
        .await;
    assert!(res.starts_with("RTSP/1.0 501"), "got: {}", res);
}

#[tokio::test]
async fn unknown_method_is_not_implemented() {
    let handler = TestHandler::new(Capabilities::default());
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let res = client
        .request("FLUSH rtsp://h/ RTSP/1.0\r\nCSeq: 4\r\n\r\n")
        .await;
    assert!(res.starts_with("RTSP/1.0 501"), "got: {}", res);
    assert_eq!(header_value(&res, "CSeq"), Some("4"));
}

#[tokio::test]
async fn cross_session_request_is_rejected_and_binding_survives() {
    let handler = TestHandler::new(Capabilities {
        setup: true,
        play: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam", addr);
    let res = client
        .request(&format!(
            "SETUP {}/trackID=0 RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            uri
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
    let id = session_id(&res);

    // Driving a different session through a bound connection: 400, CSeq
    // still echoed, binding untouched.
    let res = client
        .request(&format!(
            "PLAY {} RTSP/1.0\r\nCSeq: 7\r\nSession: {}\r\n\r\n",
            uri, "deadbeefdeadbeef"
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 400"), "got: {}", res);
    assert_eq!(header_value(&res, "CSeq"), Some("7"));

    let res = client
        .request(&format!(
            "PLAY {} RTSP/1.0\r\nCSeq: 8\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
}

#[tokio::test]
async fn udp_setup_reply_advertises_server_ports() {
    let handler = TestHandler::new(Capabilities {
        setup: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let res = client
        .request(&format!(
            "SETUP rtsp://{}/cam/trackID=0 RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            addr
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
    let transport = header_value(&res, "Transport").expect("Transport header");
    assert!(transport.contains("client_port=5000-5001"), "{}", transport);
    assert!(transport.contains("server_port="), "{}", transport);
    assert!(header_value(&res, "Session").unwrap().contains("timeout="));
}

#[tokio::test]
async fn interleaved_frame_before_play_terminates_connection() {
    let handler = TestHandler::new(Capabilities::default());
    let (_server, addr) = start_server(handler.clone()).await;
    let mut client = TestClient::connect(addr).await;

    client.send_raw(b"$\x00\x00\x04abcd").await;
    client.expect_eof().await;

    let err = handler.wait_for_conn_close().await;
    assert!(
        err.contains("unexpected interleaved frame"),
        "unexpected close reason: {}",
        err
    );
}

#[tokio::test]
async fn teardown_detaches_and_destroys_the_session() {
    let handler = TestHandler::new(Capabilities {
        setup: true,
        play: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam", addr);
    let res = client
        .request(&format!(
            "SETUP {}/trackID=0 RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            uri
        ))
        .await;
    let id = session_id(&res);

    let res = client
        .request(&format!(
            "TEARDOWN {} RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);

    // The ID is stale now; the connection is no longer bound to anything.
    let res = client
        .request(&format!(
            "PLAY {} RTSP/1.0\r\nCSeq: 3\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 454"), "got: {}", res);
}

#[tokio::test]
async fn announce_record_flow_accepts_interleaved_frames() {
    let handler = TestHandler::new(Capabilities {
        announce: true,
        setup: true,
        record: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam", addr);
    let sdp = "v=0\r\n";
    let res = client
        .request(&format!(
            "ANNOUNCE {} RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
            uri,
            sdp.len(),
            sdp
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
    let id = session_id(&res);

    // SETUP may omit the Session header right after ANNOUNCE; the bound
    // connection routes it to its session anyway.
    let res = client
        .request(&format!(
            "SETUP {}/trackID=0 RTSP/1.0\r\nCSeq: 2\r\n\
             Transport: RTP/AVP/TCP;unicast;interleaved=0-1;mode=record\r\n\r\n",
            uri
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
    assert_eq!(
        header_value(&res, "Transport"),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );

    let res = client
        .request(&format!(
            "RECORD {} RTSP/1.0\r\nCSeq: 3\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);

    // Interleaved media frames are legal now and must not kill the
    // connection: a control request still round-trips afterwards.
    client.send_raw(b"$\x00\x00\x04abcd").await;
    client.send_raw(b"$\x01\x00\x02xy").await;
    let res = client
        .request(&format!(
            "GET_PARAMETER {} RTSP/1.0\r\nCSeq: 4\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
}

#[tokio::test]
async fn record_before_setup_is_rejected_with_455() {
    let handler = TestHandler::new(Capabilities {
        announce: true,
        setup: true,
        record: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam", addr);
    let sdp = "v=0\r\n";
    let res = client
        .request(&format!(
            "ANNOUNCE {} RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
            uri,
            sdp.len(),
            sdp
        ))
        .await;
    let id = session_id(&res);

    let res = client
        .request(&format!(
            "RECORD {} RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 455"), "got: {}", res);
    assert_eq!(header_value(&res, "CSeq"), Some("2"));
}

#[tokio::test]
async fn pause_returns_session_to_ready() {
    let handler = TestHandler::new(Capabilities {
        setup: true,
        play: true,
        pause: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam", addr);
    let res = client
        .request(&format!(
            "SETUP {}/trackID=0 RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            uri
        ))
        .await;
    let id = session_id(&res);

    for (cseq, method) in [(2, "PLAY"), (3, "PAUSE"), (4, "PLAY")] {
        let res = client
            .request(&format!(
                "{} {} RTSP/1.0\r\nCSeq: {}\r\nSession: {}\r\n\r\n",
                method, uri, cseq, id
            ))
            .await;
        assert!(
            res.starts_with("RTSP/1.0 200 OK"),
            "{} failed: {}",
            method,
            res
        );
    }
}

#[tokio::test]
async fn pause_outside_play_or_record_is_rejected() {
    let handler = TestHandler::new(Capabilities {
        announce: true,
        setup: true,
        play: true,
        record: true,
        pause: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let uri = format!("rtsp://{}/cam", addr);

    // No Session header at all: 501 before any session is touched.
    let mut client = TestClient::connect(addr).await;
    let res = client
        .request(&format!("PAUSE {} RTSP/1.0\r\nCSeq: 1\r\n\r\n", uri))
        .await;
    assert!(res.starts_with("RTSP/1.0 501"), "got: {}", res);

    // Play path in Ready (SETUP done, PLAY not yet): 455.
    let res = client
        .request(&format!(
            "SETUP {}/trackID=0 RTSP/1.0\r\nCSeq: 2\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            uri
        ))
        .await;
    let id = session_id(&res);
    let res = client
        .request(&format!(
            "PAUSE {} RTSP/1.0\r\nCSeq: 3\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 455"), "got: {}", res);
    assert_eq!(header_value(&res, "CSeq"), Some("3"));

    // Not fatal: the session still reaches Play, where PAUSE is legal.
    for (cseq, method, expect) in [(4, "PLAY", "200 OK"), (5, "PAUSE", "200 OK")] {
        let res = client
            .request(&format!(
                "{} {} RTSP/1.0\r\nCSeq: {}\r\nSession: {}\r\n\r\n",
                method, uri, cseq, id
            ))
            .await;
        assert!(
            res.starts_with(&format!("RTSP/1.0 {}", expect)),
            "{} failed: {}",
            method,
            res
        );
    }

    // Record path in Prerecord (ANNOUNCE done, RECORD not yet): 455.
    let mut client2 = TestClient::connect(addr).await;
    let sdp = "v=0\r\n";
    let res = client2
        .request(&format!(
            "ANNOUNCE {} RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
            uri,
            sdp.len(),
            sdp
        ))
        .await;
    let id2 = session_id(&res);
    let res = client2
        .request(&format!(
            "PAUSE {} RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n",
            uri, id2
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 455"), "got: {}", res);
}

#[tokio::test]
async fn options_with_session_header_is_a_keepalive() {
    let handler = TestHandler::new(Capabilities {
        setup: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let res = client
        .request(&format!(
            "SETUP rtsp://{}/cam/trackID=0 RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            addr
        ))
        .await;
    let id = session_id(&res);

    let res = client
        .request(&format!(
            "OPTIONS rtsp://{}/ RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n",
            addr, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);
    assert_eq!(session_id(&res), id);
}

#[tokio::test]
async fn get_parameter_without_handler_is_a_keepalive_in_session() {
    let handler = TestHandler::new(Capabilities {
        setup: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler).await;
    let mut client = TestClient::connect(addr).await;

    let res = client
        .request(&format!(
            "SETUP rtsp://{}/cam/trackID=0 RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            addr
        ))
        .await;
    let id = session_id(&res);

    let res = client
        .request(&format!(
            "GET_PARAMETER rtsp://{}/cam RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n",
            addr, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"), "got: {}", res);

    // Without a session, a capability-less GET_PARAMETER is 501.
    let res = client
        .request(&format!(
            "GET_PARAMETER rtsp://{}/cam RTSP/1.0\r\nCSeq: 3\r\n\r\n",
            addr
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 501"), "got: {}", res);
}

#[tokio::test]
async fn graceful_shutdown_terminates_connections() {
    let handler = TestHandler::new(Capabilities::default());
    let (server, addr) = start_server(handler.clone()).await;
    let mut client = TestClient::connect(addr).await;

    let res = client
        .request("OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n\r\n")
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"));

    server.close();
    client.expect_eof().await;

    let err = handler.wait_for_conn_close().await;
    assert!(err.contains("terminated"), "unexpected close reason: {}", err);
}

#[tokio::test]
async fn idle_session_times_out() {
    let handler = TestHandler::new(Capabilities {
        setup: true,
        play: true,
        ..Default::default()
    });
    let mut config = ServerConfig::new(handler.clone());
    config.session_timeout = Duration::from_millis(300);
    let (_server, addr) = start_server_with(config).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam", addr);
    let res = client
        .request(&format!(
            "SETUP {}/trackID=0 RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            uri
        ))
        .await;
    let id = session_id(&res);

    sleep(Duration::from_millis(700)).await;

    let err = handler.wait_for_session_close().await;
    assert!(err.contains("timed out"), "unexpected close reason: {}", err);

    // The session is gone; the connection survives it.
    let res = client
        .request(&format!(
            "PLAY {} RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;
    assert!(res.starts_with("RTSP/1.0 454"), "got: {}", res);
}

#[tokio::test]
async fn losing_the_tcp_transport_connection_closes_the_session() {
    let handler = TestHandler::new(Capabilities {
        announce: true,
        setup: true,
        record: true,
        ..Default::default()
    });
    let (_server, addr) = start_server(handler.clone()).await;
    let mut client = TestClient::connect(addr).await;

    let uri = format!("rtsp://{}/cam", addr);
    let sdp = "v=0\r\n";
    let res = client
        .request(&format!(
            "ANNOUNCE {} RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
            uri,
            sdp.len(),
            sdp
        ))
        .await;
    let id = session_id(&res);

    client
        .request(&format!(
            "SETUP {}/trackID=0 RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\
             Transport: RTP/AVP/TCP;unicast;interleaved=0-1;mode=record\r\n\r\n",
            uri, id
        ))
        .await;
    client
        .request(&format!(
            "RECORD {} RTSP/1.0\r\nCSeq: 3\r\nSession: {}\r\n\r\n",
            uri, id
        ))
        .await;

    drop(client);

    let err = handler.wait_for_session_close().await;
    assert!(
        err.contains("TCP media transport"),
        "unexpected close reason: {}",
        err
    );
}

#[tokio::test]
async fn byte_counters_and_conn_identity_are_visible_to_hooks() {
    // on_conn_close sees the same Arc the hooks saw; counters moved.
    struct CountingHandler {
        bytes: Mutex<Option<(u64, u64)>>,
    }

    #[async_trait]
    impl ServerHandler for CountingHandler {
        async fn on_conn_close(&self, conn: &Arc<rtspd::ServerConn>, _err: &RtspError) {
            *self.bytes.lock() = Some((conn.bytes_received(), conn.bytes_sent()));
        }
    }

    let handler = Arc::new(CountingHandler {
        bytes: Mutex::new(None),
    });
    let mut server = Server::new("127.0.0.1:0", ServerConfig::new(handler.clone()));
    server.start().await.expect("server start");
    let addr = server.local_addr().unwrap();

    let mut client = TestClient::connect(addr).await;
    let res = client
        .request("OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n\r\n")
        .await;
    assert!(res.starts_with("RTSP/1.0 200 OK"));
    drop(client);

    for _ in 0..100 {
        if handler.bytes.lock().is_some() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let (received, sent) = handler.bytes.lock().expect("on_conn_close fired");
    assert!(received > 0, "request bytes must be counted");
    assert!(sent > 0, "response bytes must be counted");
}
