//! camera-relay server
//!
//! Run with: camera-relay [--config FILE] [BIND_ADDR]
//!
//! Without a capture backend the relay drives its bus from a synthetic test
//! source and answers signaling through the loopback engine, which is enough
//! to exercise the viewer page, recording and uploads end to end.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use camera_relay::engine::{LoopbackEngine, TestSource, VirtualDevice};
use camera_relay::presence::MemoryAccessLog;
use camera_relay::server::config::DEFAULT_PORT;
use camera_relay::{RelayServer, ServerConfig, ServerContext};

const TEST_SOURCE_FPS: u32 = 25;

struct Args {
    config: Option<PathBuf>,
    bind_addr: Option<SocketAddr>,
}

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:7788
/// - "127.0.0.1:8000" -> 127.0.0.1:8000
/// - "0.0.0.0" -> 0.0.0.0:7788
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        config: None,
        bind_addr: None,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config needs a file path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            other if parsed.bind_addr.is_none() => {
                parsed.bind_addr = Some(parse_bind_addr(other)?);
            }
            other => return Err(format!("Unexpected argument: '{}'", other)),
        }
    }
    Ok(parsed)
}

fn print_usage() {
    eprintln!("Usage: camera-relay [--config FILE] [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  --config FILE   JSON config (http.port, rootdir, rec_len, auth, ...)");
    eprintln!("  BIND_ADDR       Address to bind to (default: 0.0.0.0:{})", DEFAULT_PORT);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("camera_relay=info".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = args.bind_addr {
        config = config.bind(addr);
    }

    tracing::info!(
        addr = %config.bind_addr,
        web_root = %config.web_root.display(),
        record_root = %config.record_root.display(),
        stun = %config.stun_server,
        auth = config.auth.enabled,
        "Starting camera relay"
    );
    if config.auth.enabled && config.auth.users.is_empty() {
        tracing::warn!(
            realm = %config.auth.realm,
            "Auth enabled with no users; every request will be refused"
        );
    }

    let engine = Arc::new(
        LoopbackEngine::with_frame_capacity(config.frame_queue_capacity)
            .stun_server(config.stun_server.clone()),
    );
    let ctx = ServerContext::new(
        config,
        engine,
        Arc::new(VirtualDevice::new()),
        Arc::new(MemoryAccessLog::new()),
    );
    let source = TestSource::spawn(Arc::clone(&ctx.bus), TEST_SOURCE_FPS)?;

    let server = RelayServer::new(ctx);
    let result = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await;

    let produced = source.stop();
    tracing::info!(frames = produced, "Camera relay stopped");

    result.map_err(Into::into)
}
