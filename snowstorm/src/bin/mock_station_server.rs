//! Minimal station server speaking the same command line and stdin REPL as
//! the real one, for exercising the harness without it.
//!
//! Usage: `mock-station-server <port> <station>...`. Nothing is streamed;
//! the server only tracks which client sits on which station.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use snowstorm_core::station::{Station, StationId};
use snowstorm_protocol::control::{self, ControlMessage, Reply};
use snowstorm_protocol::{ServerCommand, render_station_dump};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

type Stations = Arc<RwLock<Vec<Station>>>;

#[derive(Parser, Debug)]
#[command(about = "Mock station server", long_about = None)]
struct Args {
    /// TCP port for control connections
    port: u16,

    /// Station sources; station id is the position in this list
    #[arg(required = true)]
    stations: Vec<Utf8PathBuf>,
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

    let stations: Vec<Station> = args
        .stations
        .iter()
        .enumerate()
        .map(|(id, path)| Station::new(id as StationId, song_name(path)))
        .collect();
    let state: Stations = Arc::new(RwLock::new(stations));

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, args.port))
        .await
        .with_context(|| format!("binding port {}", args.port))?;
    info!("Listening on port {} with {} stations", args.port, args.stations.len());

    let accept = tokio::spawn(accept_loop(listener, state.clone()));
    let result = repl(state).await;
    accept.abort();
    result
}

fn song_name(path: &Utf8Path) -> String {
    path.file_name().unwrap_or(path.as_str()).to_owned()
}

async fn accept_loop(listener: TcpListener, state: Stations) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, addr, state).await {
                        error!("Client {} error: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: TcpStream, addr: SocketAddr, state: Stations) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let udp_port = match control::read_message(&mut reader).await? {
        Some(ControlMessage::Hello { udp_port }) => udp_port,
        Some(other) => {
            let reason = format!("expected Hello, got {other:?}");
            control::write_reply(&mut writer, &Reply::InvalidCommand { reason }).await?;
            return Ok(());
        }
        None => return Ok(()),
    };
    let client = format!("{}:{}", addr.ip(), udp_port);

    let count = state.read().await.len() as u16;
    control::write_reply(&mut writer, &Reply::Welcome { stations: count }).await?;
    info!("{} connected", client);

    let mut current: Option<usize> = None;
    let result = loop {
        let message = match control::read_message(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        };

        let ControlMessage::SetStation { station } = message else {
            let reason = "duplicate Hello".to_owned();
            break control::write_reply(&mut writer, &Reply::InvalidCommand { reason })
                .await
                .map_err(Into::into);
        };

        let song = {
            let mut stations = state.write().await;
            leave(&mut stations, current.take(), &client);
            match stations.get_mut(usize::from(station)) {
                Some(target) => {
                    target.add_client(client.clone());
                    current = Some(usize::from(station));
                    Some(target.song.clone())
                }
                None => None,
            }
        };

        match song {
            Some(song) => {
                debug!("{} joined station {}", client, station);
                control::write_reply(&mut writer, &Reply::Announce { song }).await?;
            }
            None => {
                warn!("{} asked for unknown station {}", client, station);
                let reason = format!("station {station} does not exist");
                break control::write_reply(&mut writer, &Reply::InvalidCommand { reason })
                    .await
                    .map_err(Into::into);
            }
        }
    };

    leave(&mut *state.write().await, current, &client);
    info!("{} disconnected", client);
    result
}

fn leave(stations: &mut [Station], station: Option<usize>, client: &str) {
    let Some(station) = station.and_then(|id| stations.get_mut(id)) else {
        return;
    };
    if let Some(pos) = station.clients.iter().position(|c| c == client) {
        station.clients.remove(pos);
    }
}

async fn repl(state: Stations) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match ServerCommand::parse(&line) {
            Ok(ServerCommand::Dump { path }) => {
                let dump = render_station_dump(state.read().await.iter());
                match path {
                    Some(path) => {
                        if let Err(e) = write_dump(&path, &dump) {
                            error!("Failed to write {}: {}", path, e);
                        }
                    }
                    None => print!("{dump}"),
                }
            }
            Ok(ServerCommand::Quit) => {
                info!("Quitting");
                return Ok(());
            }
            Err(e) => warn!("{}", e),
        }
    }

    info!("Input closed, quitting");
    Ok(())
}

/// Writes to a temp file and renames it, so a poller never sees a partial dump.
fn write_dump(path: &Utf8Path, dump: &str) -> std::io::Result<()> {
    let temp_path = format!("{path}.tmp");
    std::fs::write(&temp_path, dump)?;
    std::fs::rename(&temp_path, path)
}
