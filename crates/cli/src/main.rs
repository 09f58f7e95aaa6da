use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use rtspd::{
    Capabilities, DescribeCtx, MediaDescription, MediaFormat, MediaKind, PlayCtx, Response,
    RtspError, Server, ServerConfig, ServerHandler, ServerStream, SetupCtx, StreamDescription,
};

#[derive(Parser)]
#[command(
    name = "rtspd",
    about = "Standalone RTSP endpoint answering DESCRIBE/SETUP/PLAY for a test stream"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Multicast CIDR range enabling the vlcmulticast DESCRIBE query
    #[arg(long)]
    multicast_range: Option<String>,
}

/// Serves one static H.264 description at every path. Media delivery is up
/// to the embedding application; this binary exercises the control plane.
struct TestStreamHandler {
    stream: Arc<ServerStream>,
}

impl TestStreamHandler {
    fn new() -> Self {
        let description = StreamDescription::new(
            "Test Stream",
            vec![MediaDescription {
                kind: MediaKind::Video,
                control: String::new(),
                formats: vec![MediaFormat {
                    payload_type: 96,
                    rtpmap: Some("H264/90000".to_string()),
                    fmtp: Some("packetization-mode=1".to_string()),
                }],
            }],
        );
        TestStreamHandler {
            stream: Arc::new(ServerStream::new(description)),
        }
    }
}

#[async_trait]
impl ServerHandler for TestStreamHandler {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            describe: true,
            setup: true,
            play: true,
            ..Default::default()
        }
    }

    async fn on_describe(
        &self,
        ctx: DescribeCtx<'_>,
    ) -> (Response, Option<Arc<ServerStream>>, Option<RtspError>) {
        tracing::info!(path = %ctx.path, "DESCRIBE");
        (Response::ok(), Some(self.stream.clone()), None)
    }

    async fn on_setup(&self, ctx: SetupCtx<'_>) -> (Response, Option<RtspError>) {
        tracing::info!(path = %ctx.path, "SETUP");
        (Response::ok(), None)
    }

    async fn on_play(&self, ctx: PlayCtx<'_>) -> (Response, Option<RtspError>) {
        tracing::info!(path = %ctx.path, "PLAY");
        (Response::ok(), None)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = ServerConfig::new(Arc::new(TestStreamHandler::new()));
    config.multicast_ip_range = args.multicast_range;

    let mut server = Server::new(&args.bind, config);
    if let Err(e) = server.start().await {
        eprintln!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    println!("RTSP server on {} — Ctrl-C to stop", args.bind);
    let _ = tokio::signal::ctrl_c().await;

    server.close();
}
