mod common;

use common::{mock_client_config, start_mock_server};
use snowstorm_core::config::{StationDraw, WorkloadConfig};
use snowstorm_core::verify;
use snowstorm_process::{ClientController, ClientLaunch, WorkloadDriver};
use std::time::{Duration, Instant};

const QUIET: Duration = Duration::from_millis(50);
const GRACE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_two_clients_on_station_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8Path::from_path(dir.path()).unwrap().join("stations.txt");

    let mut server = start_mock_server().await;
    let launch = ClientLaunch::new(&mock_client_config(), "127.0.0.1", server.port());
    let mut first = ClientController::start(&launch, 10000).unwrap();
    let mut second = ClientController::start(&launch, 10001).unwrap();
    first.join_station(0).await.unwrap();
    second.join_station(0).await.unwrap();

    let expected = ["127.0.0.1:10000", "127.0.0.1:10001"];
    let deadline = Instant::now() + Duration::from_secs(10);
    let db = loop {
        let db = server.dump_stations(&path).await.unwrap();
        if verify::matches(expected, db.clients_of(0).iter().map(String::as_str)) {
            break db;
        }
        assert!(Instant::now() < deadline, "clients never showed up: {db:?}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    assert_eq!(db.get(0).unwrap().song, "first.mp3");
    assert!(db.clients_of(1).is_empty());
    assert!(db.clients_of(2).is_empty());

    first.kill();
    second.kill();
    server.stop(QUIET, GRACE).await.unwrap();
    assert!(!server.is_alive());
}

#[tokio::test]
async fn test_unknown_station_disconnects_client() {
    let mut server = start_mock_server().await;
    let launch = ClientLaunch::new(&mock_client_config(), "127.0.0.1", server.port());
    let mut client = ClientController::start(&launch, 10100).unwrap();

    // the catalog has three stations, so id 3 is one past the end
    client.join_station(3).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while client.is_alive() {
        assert!(Instant::now() < deadline, "client survived an invalid station");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    server.stop(QUIET, GRACE).await.unwrap();
}

#[tokio::test]
async fn test_driver_snapshot_matches_clients() {
    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8Path::from_path(dir.path()).unwrap().join("stations.txt");

    let server = start_mock_server().await;
    let client = mock_client_config();
    let launch = ClientLaunch::new(&client, "127.0.0.1", server.port());
    let workload = WorkloadConfig {
        clients: 6,
        iterations: 2,
        join_rounds: 3,
        round_delay_ms: 20,
        listen_ms: 300,
        post_kill_delay_ms: 100,
        kill_probability: 0.5,
        station_draw: StationDraw::Catalog,
        seed: Some(3),
        verify_every: 1,
    };
    let mut driver = WorkloadDriver::new(server, launch, "127.0.0.1", 10200, workload);

    for _ in 0..workload.iterations {
        let mut report = driver.run_joins().await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let verification = driver.verify_snapshot(&path).await.unwrap();
            assert!(verification.out_of_catalog.is_empty());
            if verification.is_consistent() {
                assert_eq!(verification.matched, [0, 1, 2]);
                break;
            }
            assert!(Instant::now() < deadline, "snapshot never settled: {verification:?}");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        driver.run_culling(&mut report).await;
    }
    assert_eq!(driver.iteration(), 2);

    driver.shutdown(QUIET, GRACE).await.unwrap();
}
