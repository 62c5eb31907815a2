//! Chat relay - entry point
//!
//! Binds the server and wires up the two operator surfaces: Ctrl-C for an
//! immediate shutdown, and a stdin console accepting `/exit` (immediate) and
//! `/shutdown <seconds>` (warn, wait, force).

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_relay::Server;

/// Default listen address
const DEFAULT_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level, e.g. RUST_LOG=chat_relay=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let addr = env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let server = Arc::new(Server::bind(&addr).await?);
    info!(%addr, "chat relay listening");

    // Operator console on stdin.
    let console = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line == "/exit" {
                    server.shutdown().await;
                    break;
                } else if let Some(rest) = line.strip_prefix("/shutdown") {
                    match rest.trim().parse::<u64>() {
                        Ok(seconds) => {
                            server.shutdown_with_timeout(Duration::from_secs(seconds)).await;
                            break;
                        }
                        Err(_) => println!("Invalid usage. /shutdown <seconds>"),
                    }
                }
            }
        })
    };

    // Graceful shutdown on SIGINT.
    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                server.shutdown().await;
            }
        });
    }

    server.join().await;
    console.abort();
    info!("server ended");
    Ok(())
}
