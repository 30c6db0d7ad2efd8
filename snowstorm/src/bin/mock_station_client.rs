//! Minimal station control client.
//!
//! Usage: `mock-station-client <server_host> <server_port> <udp_port>`, then
//! one station id per line on stdin. Exits when the server rejects a command
//! or closes the connection.

use anyhow::{Context, Result, bail};
use clap::Parser;
use snowstorm_protocol::ClientCommand;
use snowstorm_protocol::control::{self, ControlMessage, Reply};
use std::io::BufRead;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Mock station client", long_about = None)]
struct Args {
    server_host: String,
    server_port: u16,
    /// Port the client would receive the stream on
    udp_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stream = TcpStream::connect((args.server_host.as_str(), args.server_port))
        .await
        .with_context(|| format!("connecting to {}:{}", args.server_host, args.server_port))?;
    let (mut reader, mut writer) = stream.into_split();

    control::write_message(&mut writer, ControlMessage::Hello { udp_port: args.udp_port }).await?;
    match control::read_reply(&mut reader).await? {
        Some(Reply::Welcome { stations }) => info!("Welcome: {} stations", stations),
        other => bail!("expected Welcome, got {other:?}"),
    }

    // Replies are read on their own task; a half-read reply must never be dropped
    let mut replies = tokio::spawn(watch_replies(reader));
    let mut lines = spawn_stdin_reader()?;

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match ClientCommand::parse(&line) {
                    Ok(ClientCommand::Join(station)) => {
                        let message = ControlMessage::SetStation { station };
                        control::write_message(&mut writer, message).await?;
                    }
                    Ok(ClientCommand::Quit) => break,
                    Err(e) => warn!("{}", e),
                }
            }
            finished = &mut replies => {
                return finished.context("reply reader panicked")?;
            }
        }
    }

    replies.abort();
    Ok(())
}

/// Reads stdin on a plain thread so a blocked read never holds up exit.
fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("starting stdin reader")?;
    Ok(rx)
}

async fn watch_replies(mut reader: OwnedReadHalf) -> Result<()> {
    loop {
        match control::read_reply(&mut reader).await? {
            Some(Reply::Announce { song }) => info!("New song announced: {}", song),
            Some(Reply::InvalidCommand { reason }) => bail!("server rejected command: {reason}"),
            Some(Reply::Welcome { .. }) => bail!("unexpected Welcome"),
            None => {
                info!("Server closed the connection");
                return Ok(());
            }
        }
    }
}
