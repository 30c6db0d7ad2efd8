//! Randomised workload over a fixed pool of client slots.
//!
//! Each iteration respawns dead clients, runs several rounds of random joins,
//! lets the clients listen, then kills a random subset. Slot `i` always uses
//! listener port `base + i`; only the process occupying it changes.

use crate::client::{ClientController, ClientLaunch};
use crate::server::ServerController;
use camino::Utf8Path;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snowstorm_core::config::{StationDraw, WorkloadConfig};
use snowstorm_core::error::Result;
use snowstorm_core::station::StationId;
use snowstorm_core::verify::{self, Expectation, VerificationReport};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ClientSlot {
    index: usize,
    listener_port: u16,
    occupant: Option<ClientController>,
    spawned: u64,
}

impl ClientSlot {
    fn new(index: usize, listener_port: u16) -> Self {
        Self {
            index,
            listener_port,
            occupant: None,
            spawned: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn listener_port(&self) -> u16 {
        self.listener_port
    }

    pub fn occupant(&self) -> Option<&ClientController> {
        self.occupant.as_ref()
    }

    /// How many processes have occupied this slot so far
    pub fn spawn_count(&self) -> u64 {
        self.spawned
    }

    /// Station the current occupant last joined, if any
    pub fn last_requested(&self) -> Option<StationId> {
        self.occupant.as_ref().and_then(ClientController::last_requested)
    }

    pub fn is_alive(&mut self) -> bool {
        self.occupant.as_mut().is_some_and(ClientController::is_alive)
    }

    /// Starts a fresh process if the slot is empty or its occupant died.
    /// Returns whether a process was started.
    fn ensure_running(&mut self, launch: &ClientLaunch) -> Result<bool> {
        if self.is_alive() {
            return Ok(false);
        }
        if let Some(mut old) = self.occupant.take() {
            old.kill();
        }
        self.occupant = Some(ClientController::start(launch, self.listener_port)?);
        self.spawned += 1;
        Ok(true)
    }

    fn kill(&mut self) -> bool {
        let Some(client) = self.occupant.as_mut() else {
            return false;
        };
        if !client.is_alive() {
            return false;
        }
        client.kill();
        true
    }
}

/// Counters for one iteration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub iteration: u64,
    pub respawned: usize,
    pub joins_sent: usize,
    pub failed_joins: usize,
    pub killed: usize,
}

pub struct WorkloadDriver<R = StdRng> {
    workload: WorkloadConfig,
    launch: ClientLaunch,
    listener_host: String,
    server: ServerController,
    slots: Vec<ClientSlot>,
    iteration: u64,
    rng: R,
}

impl WorkloadDriver<StdRng> {
    /// Seeds from `workload.seed` when set, otherwise from OS entropy.
    pub fn new(
        server: ServerController,
        launch: ClientLaunch,
        listener_host: impl Into<String>,
        listener_base_port: u16,
        workload: WorkloadConfig,
    ) -> Self {
        let rng = match workload.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(server, launch, listener_host, listener_base_port, workload, rng)
    }
}

impl<R: Rng> WorkloadDriver<R> {
    pub fn with_rng(
        server: ServerController,
        launch: ClientLaunch,
        listener_host: impl Into<String>,
        listener_base_port: u16,
        workload: WorkloadConfig,
        rng: R,
    ) -> Self {
        let slots = (0..workload.clients)
            .map(|index| {
                let offset = u16::try_from(index).unwrap_or(u16::MAX);
                ClientSlot::new(index, listener_base_port.saturating_add(offset))
            })
            .collect();

        Self {
            workload,
            launch,
            listener_host: listener_host.into(),
            server,
            slots,
            iteration: 0,
            rng,
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn workload(&self) -> &WorkloadConfig {
        &self.workload
    }

    pub fn slots(&self) -> &[ClientSlot] {
        &self.slots
    }

    pub fn server(&self) -> &ServerController {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut ServerController {
        &mut self.server
    }

    /// Runs the configured number of iterations without verification.
    pub async fn run(&mut self) -> Result<Vec<IterationReport>> {
        let mut reports = Vec::new();
        for _ in 0..self.workload.iterations {
            reports.push(self.run_iteration().await?);
        }
        Ok(reports)
    }

    /// One full iteration: [`Self::run_joins`] then [`Self::run_culling`].
    pub async fn run_iteration(&mut self) -> Result<IterationReport> {
        let mut report = self.run_joins().await?;
        self.run_culling(&mut report).await;
        Ok(report)
    }

    /// Respawn pass, join storm and listen period.
    ///
    /// The clients are in their steady state when this returns, which is
    /// where a caller would verify a snapshot.
    pub async fn run_joins(&mut self) -> Result<IterationReport> {
        let mut report = IterationReport {
            iteration: self.iteration,
            ..IterationReport::default()
        };

        report.respawned += self.respawn_dead()?;
        self.join_storm(&mut report).await?;

        debug!("Listening for {:?}", self.workload.listen_period());
        pause(self.workload.listen_period()).await;
        Ok(report)
    }

    /// Random culling and the post-iteration delay. Advances the iteration counter.
    ///
    /// Client output buffered so far is forwarded before anyone is killed.
    pub async fn run_culling(&mut self, report: &mut IterationReport) {
        self.drain_clients();
        report.killed = self.cull();
        pause(self.workload.post_kill_delay()).await;

        info!(
            "Iteration {}: respawned {}, joins {}, failed joins {}, killed {}",
            report.iteration,
            report.respawned,
            report.joins_sent,
            report.failed_joins,
            report.killed
        );
        self.iteration += 1;
    }

    /// Starts a process in every empty or dead slot. Returns how many were started.
    pub fn respawn_dead(&mut self) -> Result<usize> {
        let mut started = 0;
        for slot in &mut self.slots {
            if slot.ensure_running(&self.launch)? {
                debug!("Started client in slot {} on port {}", slot.index, slot.listener_port);
                started += 1;
            }
        }
        Ok(started)
    }

    /// `join_rounds` rounds of one random join per slot, pacing after each round.
    ///
    /// A join that fails with a slot-local error only marks its slot for
    /// respawn; anything else aborts the storm.
    pub async fn join_storm(&mut self, report: &mut IterationReport) -> Result<()> {
        for round in 0..self.workload.join_rounds {
            for index in 0..self.slots.len() {
                let station = self.draw_station();
                let slot = &mut self.slots[index];
                if slot.ensure_running(&self.launch)? {
                    report.respawned += 1;
                }
                let Some(client) = slot.occupant.as_mut() else {
                    continue;
                };
                let joined = client.join_station(station).await;
                tally_join(report, index, joined)?;
            }
            debug!("Join round {} done", round);
            pause(self.workload.round_delay()).await;
        }
        Ok(())
    }

    /// Forwards output already captured from every client without waiting.
    /// Returns the number of bytes forwarded.
    pub fn drain_clients(&mut self) -> usize {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.occupant.as_mut())
            .map(ClientController::drain_output)
            .sum()
    }

    /// Kills each live occupant with probability `kill_probability`.
    pub fn cull(&mut self) -> usize {
        let probability = self.workload.kill_probability.clamp(0.0, 1.0);
        let mut killed = 0;
        for slot in &mut self.slots {
            if slot.occupant.is_some() && self.rng.random_bool(probability) && slot.kill() {
                killed += 1;
            }
        }
        killed
    }

    /// What the server should report for every live slot that has joined a station
    pub fn expectations(&mut self) -> Vec<Expectation> {
        let mut expected = Vec::new();
        for slot in &mut self.slots {
            if !slot.is_alive() {
                continue;
            }
            if let Some(station) = slot.last_requested() {
                expected.push(Expectation {
                    slot: slot.index,
                    station,
                    client: format!("{}:{}", self.listener_host, slot.listener_port),
                });
            }
        }
        expected
    }

    /// Dumps the server's station table to `path` and compares it with the slots.
    pub async fn verify_snapshot(&mut self, path: &Utf8Path) -> Result<VerificationReport> {
        let db = self.server.dump_stations(path).await?;
        let expectations = self.expectations();
        let report = verify::verify_snapshot(&db, &expectations, self.server.station_count());

        if report.is_consistent() {
            info!(
                "Snapshot consistent: {} stations, {} listening clients",
                report.matched.len(),
                expectations.len()
            );
        } else {
            for mismatch in &report.mismatched {
                warn!(
                    "Station {} expected {:?}, server reports {:?}",
                    mismatch.station, mismatch.expected, mismatch.actual
                );
            }
        }
        if !report.out_of_catalog.is_empty() {
            debug!("{} slots asked for stations outside the catalog", report.out_of_catalog.len());
        }
        Ok(report)
    }

    /// Kills every client and stops the server.
    pub async fn shutdown(&mut self, quiet: Duration, grace: Duration) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(mut client) = slot.occupant.take() {
                client.kill();
            }
        }
        info!("Killed {} clients", self.slots.len());
        self.server.stop(quiet, grace).await
    }

    fn draw_station(&mut self) -> StationId {
        let count = StationId::try_from(self.server.station_count()).unwrap_or(StationId::MAX);
        draw_station(&mut self.rng, self.workload.station_draw, count)
    }
}

/// `Inclusive` draws from `0..=count`, one id past the catalog included.
fn draw_station<R: Rng>(rng: &mut R, draw: StationDraw, count: StationId) -> StationId {
    match draw {
        StationDraw::Inclusive => rng.random_range(0..=count),
        StationDraw::Catalog if count == 0 => 0,
        StationDraw::Catalog => rng.random_range(0..count),
    }
}

fn tally_join(report: &mut IterationReport, slot: usize, joined: Result<()>) -> Result<()> {
    match joined {
        Ok(()) => report.joins_sent += 1,
        Err(e) if e.is_slot_local() => {
            debug!("Slot {} join failed, will respawn: {}", slot, e);
            report.failed_joins += 1;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
