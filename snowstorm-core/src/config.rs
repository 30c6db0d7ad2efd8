use crate::error::{HarnessError, Result};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_binary")]
    pub binary: Utf8PathBuf,
    #[serde(default = "default_server_host")]
    pub host: String,
    /// Fixed server port; an unused local port is picked when absent
    pub port: Option<u16>,
    /// Station sources, in catalog order. Station id `i` is `stations[i]`.
    #[serde(default)]
    pub stations: Vec<Utf8PathBuf>,
    #[serde(default = "default_dump_path")]
    pub dump_path: Utf8PathBuf,
    #[serde(default = "default_startup_delay")]
    pub startup_delay_ms: u64,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_server_capture")]
    pub capture: OutputCapture,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_binary")]
    pub binary: Utf8PathBuf,
    /// Host part of the identifier the server records for each client
    #[serde(default = "default_listener_host")]
    pub listener_host: String,
    /// Slot `i` listens on `listener_base_port + i`
    #[serde(default = "default_listener_base_port")]
    pub listener_base_port: u16,
    #[serde(default)]
    pub capture: OutputCapture,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_clients")]
    pub clients: usize,
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_join_rounds")]
    pub join_rounds: u32,
    #[serde(default = "default_round_delay")]
    pub round_delay_ms: u64,
    #[serde(default = "default_listen")]
    pub listen_ms: u64,
    #[serde(default = "default_post_kill_delay")]
    pub post_kill_delay_ms: u64,
    #[serde(default = "default_kill_probability")]
    pub kill_probability: f64,
    #[serde(default)]
    pub station_draw: StationDraw,
    pub seed: Option<u64>,
    /// Verify the server snapshot every N iterations; 0 disables verification
    #[serde(default)]
    pub verify_every: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct DumpConfig {
    #[serde(default = "default_dump_attempts")]
    pub attempts: u32,
    #[serde(default = "default_dump_interval")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

/// Where a supervised process's stdout and stderr go
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCapture {
    /// Pseudo-terminal, drained into the harness log
    Pty,
    /// Null device
    #[default]
    Discard,
}

/// Range the join storm draws station ids from
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StationDraw {
    /// `[0, stations]`: one id past the catalog is deliberately possible
    #[default]
    Inclusive,
    /// `[0, stations)`: only ids the server knows
    Catalog,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: default_server_binary(),
            host: default_server_host(),
            port: None,
            stations: Vec::new(),
            dump_path: default_dump_path(),
            startup_delay_ms: default_startup_delay(),
            stop_grace_ms: default_stop_grace(),
            capture: default_server_capture(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary: default_client_binary(),
            listener_host: default_listener_host(),
            listener_base_port: default_listener_base_port(),
            capture: OutputCapture::default(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            iterations: default_iterations(),
            join_rounds: default_join_rounds(),
            round_delay_ms: default_round_delay(),
            listen_ms: default_listen(),
            post_kill_delay_ms: default_post_kill_delay(),
            kill_probability: default_kill_probability(),
            station_draw: StationDraw::default(),
            seed: None,
            verify_every: 0,
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            attempts: default_dump_attempts(),
            interval_ms: default_dump_interval(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl WorkloadConfig {
    pub fn round_delay(&self) -> Duration {
        Duration::from_millis(self.round_delay_ms)
    }

    pub fn listen_period(&self) -> Duration {
        Duration::from_millis(self.listen_ms)
    }

    pub fn post_kill_delay(&self) -> Duration {
        Duration::from_millis(self.post_kill_delay_ms)
    }

    /// Whether a snapshot should be verified during `iteration` (0-based)
    pub fn verifies_at(&self, iteration: u64) -> bool {
        self.verify_every != 0 && (iteration + 1) % self.verify_every == 0
    }
}

impl DumpConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl OutputConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

// Default value functions
fn default_server_binary() -> Utf8PathBuf {
    Utf8PathBuf::from("./snowcast_server")
}

fn default_client_binary() -> Utf8PathBuf {
    Utf8PathBuf::from("./snowcast_control")
}

fn default_server_host() -> String {
    "localhost".to_owned()
}

fn default_listener_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_dump_path() -> Utf8PathBuf {
    Utf8PathBuf::try_from(std::env::temp_dir().join("snowstorm-stations.txt"))
        .unwrap_or_else(|_| Utf8PathBuf::from("stations.txt"))
}

const fn default_startup_delay() -> u64 {
    1000
}

const fn default_stop_grace() -> u64 {
    2000
}

fn default_server_capture() -> OutputCapture {
    OutputCapture::Pty
}

const fn default_listener_base_port() -> u16 {
    10000
}

const fn default_clients() -> usize {
    500
}

const fn default_iterations() -> u64 {
    200
}

const fn default_join_rounds() -> u32 {
    5
}

const fn default_round_delay() -> u64 {
    200
}

const fn default_listen() -> u64 {
    1500
}

const fn default_post_kill_delay() -> u64 {
    1000
}

fn default_kill_probability() -> f64 {
    0.25
}

const fn default_dump_attempts() -> u32 {
    5
}

const fn default_dump_interval() -> u64 {
    1000
}

const fn default_drain_timeout() -> u64 {
    500
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::find_config_file()?;
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| HarnessError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| HarnessError::Config(format!("Failed to parse config: {}", e)))?;

        config.expand_paths();
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|_| Self::default())
    }

    fn find_config_file() -> Result<PathBuf> {
        let candidates = [
            dirs::config_dir().map(|p| p.join("snowstorm/snowstorm.toml")),
            Some(PathBuf::from("/etc/snowstorm/snowstorm.toml")),
        ];

        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(HarnessError::Config("Config file not found".to_owned()))
    }

    fn expand_paths(&mut self) {
        fn expand_tilde(path: &Utf8PathBuf) -> Utf8PathBuf {
            let path_str = path.as_str();
            if path_str.starts_with("~/") {
                if let Some(home) = dirs::home_dir() {
                    if let Some(home_str) = home.to_str() {
                        return Utf8PathBuf::from(path_str.replacen("~", home_str, 1));
                    }
                }
            }
            path.clone()
        }

        self.server.binary = expand_tilde(&self.server.binary);
        self.server.dump_path = expand_tilde(&self.server.dump_path);
        self.client.binary = expand_tilde(&self.client.binary);
        for station in &mut self.server.stations {
            *station = expand_tilde(station);
        }
    }

    /// Checks the settings a run cannot start without.
    ///
    /// Called after command-line overrides are applied, so a partial config
    /// file plus flags is still accepted.
    pub fn validate(&self) -> Result<()> {
        if self.server.stations.is_empty() {
            return Err(HarnessError::Config(
                "At least one station source is required".to_owned(),
            ));
        }
        if self.server.stations.len() > usize::from(u16::MAX) {
            return Err(HarnessError::Config(format!(
                "Too many stations: {}",
                self.server.stations.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.workload.kill_probability) {
            return Err(HarnessError::Config(format!(
                "kill_probability must be within [0, 1], got {}",
                self.workload.kill_probability
            )));
        }
        if self.dump.attempts == 0 {
            return Err(HarnessError::Config("dump.attempts must be at least 1".to_owned()));
        }
        let last_port = usize::from(self.client.listener_base_port) + self.workload.clients;
        if self.workload.clients > 0 && last_port - 1 > usize::from(u16::MAX) {
            return Err(HarnessError::Config(format!(
                "{} clients starting at port {} overflow the port range",
                self.workload.clients, self.client.listener_base_port
            )));
        }
        Ok(())
    }
}
