use crate::supervisor::ManagedProcess;
use camino::{Utf8Path, Utf8PathBuf};
use snowstorm_core::config::{DumpConfig, ServerConfig};
use snowstorm_core::error::{HarnessError, Result};
use snowstorm_core::station::StationDatabase;
use snowstorm_protocol::{ServerCommand, parse_station_dump};
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The station server under test
#[derive(Debug)]
pub struct ServerController {
    process: ManagedProcess,
    port: u16,
    stations: Vec<Utf8PathBuf>,
    dump: DumpConfig,
}

impl ServerController {
    /// Spawns `<binary> <port> <station_0> ... <station_n>`.
    ///
    /// Station ids are positions in `config.stations`.
    pub fn start(config: &ServerConfig, port: u16, dump: DumpConfig) -> Result<Self> {
        let args = std::iter::once(port.to_string())
            .chain(config.stations.iter().map(|s| s.to_string()));
        let process = ManagedProcess::spawn(
            format!("server:{port}"),
            &config.binary,
            args,
            config.capture,
        )?;

        info!(
            "Started server {} on port {} with {} stations",
            config.binary,
            port,
            config.stations.len()
        );

        Ok(Self {
            process,
            port,
            stations: config.stations.clone(),
            dump,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn stations(&self) -> &[Utf8PathBuf] {
        &self.stations
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    pub async fn drain_output(&mut self, quiet: Duration) -> usize {
        self.process.drain_output(quiet).await
    }

    /// Asks the server to write its station table to `path` and parses it.
    ///
    /// Any stale file at `path` is removed first. The file is polled for once
    /// per `dump.interval` for `dump.attempts` intervals.
    pub async fn dump_stations(&mut self, path: &Utf8Path) -> Result<StationDatabase> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale dump {}", path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let command = ServerCommand::Dump {
            path: Some(path.to_owned()),
        };
        if let Err(e) = self.process.send_line(&command.to_line()).await {
            return Err(if e.is_slot_local() { self.died() } else { e });
        }

        for poll in 1..=self.dump.attempts {
            if path.exists() {
                break;
            }
            if !self.process.is_alive() {
                return Err(self.died());
            }
            debug!("Waiting for dump {} ({}/{})", path, poll, self.dump.attempts);
            tokio::time::sleep(self.dump.interval()).await;
        }

        if !path.exists() {
            if !self.process.is_alive() {
                return Err(self.died());
            }
            return Err(HarnessError::DatabaseTimeout {
                path: path.to_owned(),
                attempts: self.dump.attempts,
            });
        }

        let content = tokio::fs::read_to_string(path).await?;
        let db = parse_station_dump(&content)?;
        debug!("Dump {} holds {} stations", path, db.len());
        Ok(db)
    }

    /// Sends `q`, drains remaining output and waits up to `grace` for exit,
    /// killing the server if it is still running afterwards.
    pub async fn stop(&mut self, quiet: Duration, grace: Duration) -> Result<()> {
        match self.process.send_line(&ServerCommand::Quit.to_line()).await {
            Ok(()) => {}
            Err(e) if e.is_slot_local() => warn!("Server input already closed before quit"),
            Err(e) => return Err(e),
        }

        self.process.drain_output(quiet).await;

        match self.process.wait_for_exit(grace).await {
            Some(status) => info!("Server exited: {}", status),
            None => {
                warn!("Server still running {:?} after quit, killing it", grace);
                self.process.kill();
            }
        }
        Ok(())
    }

    pub fn kill(&mut self) {
        self.process.kill();
    }

    fn died(&mut self) -> HarnessError {
        // reaps the exit status if the process is already gone
        self.process.is_alive();
        HarnessError::ServerDied {
            status: self
                .process
                .exit_status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "input closed".to_owned()),
        }
    }
}
