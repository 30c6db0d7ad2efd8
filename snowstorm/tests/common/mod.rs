#![allow(dead_code)]

use camino::Utf8PathBuf;
use snowstorm_core::config::{ClientConfig, DumpConfig, OutputCapture, ServerConfig};
use snowstorm_process::{ServerController, unused_local_port};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

pub const STATIONS: [&str; 3] = ["first.mp3", "second.mp3", "third.mp3"];

pub fn mock_server_config(port: u16) -> ServerConfig {
    ServerConfig {
        binary: Utf8PathBuf::from(env!("CARGO_BIN_EXE_mock-station-server")),
        port: Some(port),
        stations: STATIONS.iter().map(Utf8PathBuf::from).collect(),
        capture: OutputCapture::Pty,
        ..ServerConfig::default()
    }
}

pub fn mock_client_config() -> ClientConfig {
    ClientConfig {
        binary: Utf8PathBuf::from(env!("CARGO_BIN_EXE_mock-station-client")),
        ..ClientConfig::default()
    }
}

/// Starts the mock server and waits until it accepts connections.
pub async fn start_mock_server() -> ServerController {
    let port = unused_local_port().unwrap();
    let dump = DumpConfig {
        attempts: 20,
        interval_ms: 100,
    };
    let mut server = ServerController::start(&mock_server_config(port), port, dump).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        // the mock drops connections that close before saying Hello
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            break;
        }
        assert!(server.is_alive(), "mock server exited during startup");
        assert!(Instant::now() < deadline, "mock server never started listening");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    server.drain_output(Duration::from_millis(50)).await;
    server
}
