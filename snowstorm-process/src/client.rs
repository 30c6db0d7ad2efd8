use crate::supervisor::ManagedProcess;
use camino::Utf8PathBuf;
use snowstorm_core::config::{ClientConfig, OutputCapture};
use snowstorm_core::error::Result;
use snowstorm_core::station::StationId;
use snowstorm_protocol::ClientCommand;
use tracing::debug;

/// How to launch a client against a running server
#[derive(Debug, Clone)]
pub struct ClientLaunch {
    pub binary: Utf8PathBuf,
    pub server_host: String,
    pub server_port: u16,
    pub capture: OutputCapture,
}

impl ClientLaunch {
    pub fn new(config: &ClientConfig, server_host: impl Into<String>, server_port: u16) -> Self {
        Self {
            binary: config.binary.clone(),
            server_host: server_host.into(),
            server_port,
            capture: config.capture,
        }
    }
}

/// One running client process
#[derive(Debug)]
pub struct ClientController {
    process: ManagedProcess,
    server_port: u16,
    listener_port: u16,
    last_requested: Option<StationId>,
    dead: bool,
}

impl ClientController {
    /// Spawns `<binary> <server_host> <server_port> <listener_port>`.
    pub fn start(launch: &ClientLaunch, listener_port: u16) -> Result<Self> {
        let process = ManagedProcess::spawn(
            format!("client:{listener_port}"),
            &launch.binary,
            [
                launch.server_host.clone(),
                launch.server_port.to_string(),
                listener_port.to_string(),
            ],
            launch.capture,
        )?;

        Ok(Self {
            process,
            server_port: launch.server_port,
            listener_port,
            last_requested: None,
            dead: false,
        })
    }

    /// Asks the client to switch to `station`.
    ///
    /// On failure the controller is marked dead and its process killed; the
    /// owner must start a replacement.
    pub async fn join_station(&mut self, station: StationId) -> Result<()> {
        match self
            .process
            .send_line(&ClientCommand::Join(station).to_line())
            .await
        {
            Ok(()) => {
                self.last_requested = Some(station);
                Ok(())
            }
            Err(e) => {
                debug!("Join {} on {} failed: {}", station, self.process.label(), e);
                self.kill();
                Err(e)
            }
        }
    }

    /// Forwards output captured so far without waiting for more.
    pub fn drain_output(&mut self) -> usize {
        self.process.drain_pending()
    }

    pub fn is_alive(&mut self) -> bool {
        !self.dead && self.process.is_alive()
    }

    pub fn kill(&mut self) {
        self.process.kill();
        self.dead = true;
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn listener_port(&self) -> u16 {
        self.listener_port
    }

    /// Last station a join was successfully written for
    pub fn last_requested(&self) -> Option<StationId> {
        self.last_requested
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }
}
