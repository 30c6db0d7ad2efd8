use anyhow::{Context, Result, bail};
use snowstorm_core::config::Config;
use snowstorm_process::{ClientLaunch, ServerController, WorkloadDriver, unused_local_port};
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};

pub async fn run(config: Config, strict: bool) -> Result<()> {
    let port = match config.server.port {
        Some(port) => port,
        None => unused_local_port().context("picking a server port")?,
    };

    let mut server = ServerController::start(&config.server, port, config.dump)
        .with_context(|| format!("starting server {}", config.server.binary))?;

    // Let the server bind before the first client connects
    let settle_started = Instant::now();
    server.drain_output(config.output.drain_timeout()).await;
    if let Some(rest) = config.server.startup_delay().checked_sub(settle_started.elapsed()) {
        tokio::time::sleep(rest).await;
    }
    if !server.is_alive() {
        server.drain_output(config.output.drain_timeout()).await;
        bail!("Server exited during startup");
    }

    let launch = ClientLaunch::new(&config.client, config.server.host.clone(), port);
    let mut driver = WorkloadDriver::new(
        server,
        launch,
        config.client.listener_host.clone(),
        config.client.listener_base_port,
        config.workload,
    );

    let outcome = tokio::select! {
        result = drive(&mut driver, &config, strict) => result,
        interrupted = signal::ctrl_c() => match interrupted {
            Ok(()) => {
                info!("Received SIGINT, tearing down");
                Ok(())
            }
            Err(err) => Err(err).context("listening for shutdown signal"),
        },
    };

    if let Err(e) = outcome.as_ref() {
        error!("Run aborted at iteration {}: {:#}", driver.iteration(), e);
    }

    info!("Stopping clients and server");
    if let Err(e) = driver
        .shutdown(config.output.drain_timeout(), config.server.stop_grace())
        .await
    {
        warn!("Teardown failed: {}", e);
    }

    outcome
}

async fn drive(driver: &mut WorkloadDriver, config: &Config, strict: bool) -> Result<()> {
    let quiet = config.output.drain_timeout();
    let mut verified = 0u64;
    let mut inconsistent = 0u64;

    for iteration in 0..config.workload.iterations {
        let mut report = driver
            .run_joins()
            .await
            .with_context(|| format!("iteration {iteration}: client workload"))?;

        if config.workload.verifies_at(iteration) {
            let verification = driver
                .verify_snapshot(&config.server.dump_path)
                .await
                .with_context(|| format!("iteration {iteration}: snapshot"))?;
            verified += 1;
            if !verification.is_consistent() {
                inconsistent += 1;
                if strict {
                    let stations: Vec<_> =
                        verification.mismatched.iter().map(|m| m.station).collect();
                    bail!("Iteration {iteration}: stations {stations:?} disagree with the clients");
                }
            }
        }

        driver.run_culling(&mut report).await;

        let server = driver.server_mut();
        server.drain_output(quiet).await;
        if !server.is_alive() {
            bail!("Server exited during iteration {iteration}");
        }
    }

    info!(
        "Completed {} iterations, {} snapshots verified, {} inconsistent",
        config.workload.iterations, verified, inconsistent
    );
    Ok(())
}

