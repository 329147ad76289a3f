//! freeciv-cli — minimal command-line client exercising the connection
//! driver. Not part of wire compatibility: it just wires `ClientConfig`
//! into `connect`/`join`/`run`.

use std::path::PathBuf;

use anyhow::{Context, Result};

use freeciv_client::handlers::{LogChatMessage, LogServerInfo};
use freeciv_protocol::schema::{PACKET_CHAT_MSG, PACKET_SERVER_INFO};
use freeciv_wire::ClientConfig;

fn print_usage() {
    println!("Usage: freeciv-cli connect <host> [options]");
    println!();
    println!("Options:");
    println!("  --port <port>         Server port (default: 6556)");
    println!("  --username <name>     Username to join with (required)");
    println!("  --validate            Assert frame byte-exactness while reading");
    println!("  --capture <path>      Append every raw frame to this file");
    println!();
    println!("Examples:");
    println!("  freeciv-cli connect localhost --username newton");
    println!("  freeciv-cli connect civserver.example.org --port 5556 --username newton --capture session.bin");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port: Option<u16> = None;
    let mut username: Option<String> = None;
    let mut validate = false;
    let mut capture: Option<String> = None;
    let mut remaining: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = Some(
                    args.get(i)
                        .context("--port requires a value")?
                        .parse()
                        .context("--port must be a number")?,
                );
            }
            "--username" => {
                i += 1;
                username = Some(args.get(i).context("--username requires a value")?.clone());
            }
            "--validate" => validate = true,
            "--capture" => {
                i += 1;
                capture = Some(args.get(i).context("--capture requires a path")?.clone());
            }
            other => remaining.push(other.to_string()),
        }
        i += 1;
    }

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    match remaining_refs.as_slice() {
        ["connect", host] => cmd_connect(host, port, username, validate, capture).await,
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

async fn cmd_connect(
    host: &str,
    port: Option<u16>,
    username: Option<String>,
    validate: bool,
    capture: Option<String>,
) -> Result<()> {
    let username = username.context("--username is required")?;

    let mut config = ClientConfig::load().context("failed to load config")?;
    config.server.host = host.to_string();
    if let Some(p) = port {
        config.server.port = p;
    }
    config.validate_frames = validate;
    config.capture_path = capture.map(PathBuf::from);

    let mut conn = freeciv_client::connect(&config).await.context("failed to connect")?;
    conn.register_handler(PACKET_SERVER_INFO, Box::new(LogServerInfo));
    conn.register_handler(PACKET_CHAT_MSG, Box::new(LogChatMessage));

    let reply = conn.join(&username).await.context("join failed")?;
    tracing::info!(?reply, "joined");

    conn.run().await.context("connection loop exited with error")?;
    Ok(())
}
