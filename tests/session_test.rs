//! End-to-end tests: observer connections against a live session server
//! with mock instruments behind it.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockInstrument;
use rust_htf::catalog::{PartRecord, ProcedureRecord, RecipeRow, TomlCatalog};
use rust_htf::config::Settings;
use rust_htf::core::{PhaseOutcome, RecipeRecord, RunStatus, Snapshot};
use rust_htf::session::{self, AppState, StartRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};

const GOOD_LABEL: &str = "0100012345678905112503192100042";
const UNREGISTERED_LABEL: &str = "0199999999999999112503192100042";

fn catalog(instrument_addr: std::net::SocketAddr) -> TomlCatalog {
    let record = |phase_name: &str, command_text: &str| RecipeRecord {
        phase_name: phase_name.to_string(),
        instrument_hostname: instrument_addr.ip().to_string(),
        instrument_port: instrument_addr.port(),
        command_text: command_text.to_string(),
        command_delay_millis: 0,
        measurement_name: None,
        measurement_units: None,
        measurement_lower_limit: None,
        measurement_upper_limit: None,
        measurement_precision: None,
    };
    TomlCatalog {
        procedures: vec![ProcedureRecord {
            id: 1,
            pid: "FVT01".to_string(),
            name: "Multi-coil Check".to_string(),
        }],
        parts: vec![PartRecord {
            id: 7,
            number: "PN-1001".to_string(),
            name: "Coil Driver".to_string(),
            revision: Some("B".to_string()),
            global_trade_item_number: "00012345678905".to_string(),
        }],
        recipes: vec![
            RecipeRow {
                part_id: 7,
                procedure_id: 1,
                record: record("power_on", ":OUTP CH1,ON"),
            },
            RecipeRow {
                part_id: 7,
                procedure_id: 1,
                record: RecipeRecord {
                    measurement_name: Some("ch2_bias_voltage".to_string()),
                    measurement_units: Some("V".to_string()),
                    measurement_lower_limit: Some(6.5),
                    measurement_upper_limit: Some(7.5),
                    measurement_precision: Some(3),
                    ..record("bias_voltage", ":MEAS:VOLT? CH2")
                },
            },
        ],
    }
}

/// Boot a server around the given catalog; returns its address.
async fn start_server(catalog: TomlCatalog) -> std::net::SocketAddr {
    let mut settings = Settings::default();
    settings.instrument.connect_timeout_ms = 500;
    settings.instrument.read_timeout_ms = 500;

    let state = AppState::from_settings(&settings, Arc::new(catalog)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(session::serve(listener, Arc::new(state)));
    addr
}

async fn send_request(client: &mut TcpStream, procedure_id: i64, label: &str) {
    let request = serde_json::to_string(&StartRequest {
        procedure_id,
        label: label.to_string(),
    })
    .unwrap();
    client.write_all(request.as_bytes()).await.unwrap();
    client.write_all(b"\n").await.unwrap();
}

/// Read snapshots until a terminal status arrives; returns the whole
/// sequence in order.
async fn read_until_terminal(lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>) -> Vec<Snapshot> {
    let mut snapshots = Vec::new();
    loop {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("timed out waiting for a snapshot")
            .unwrap()
            .expect("connection closed before a terminal snapshot");
        let snapshot: Snapshot = serde_json::from_str(&line).unwrap();
        let status = snapshot.status;
        snapshots.push(snapshot);
        if status != RunStatus::Running {
            return snapshots;
        }
    }
}

#[tokio::test]
async fn test_invalid_label_then_passing_run_on_one_connection() {
    let instrument = MockInstrument::replying("7.000").await;
    let addr = start_server(catalog(instrument.addr)).await;

    let client = TcpStream::connect(addr).await.unwrap();
    let (read_half, write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut client = write_half;

    // An unparseable label aborts the run with INVALID and no phases.
    client
        .write_all(b"{\"procedure_id\": 1, \"label\": \"garbage\"}\n")
        .await
        .unwrap();
    let snapshots = read_until_terminal(&mut lines).await;
    let terminal = snapshots.last().unwrap();
    assert_eq!(terminal.status, RunStatus::Invalid);
    assert!(terminal.procedure.phases.is_empty());
    assert_eq!(terminal.procedure.run_passed, Some(false));

    // The connection survives and immediately accepts the next request.
    let request = serde_json::to_string(&StartRequest {
        procedure_id: 1,
        label: GOOD_LABEL.to_string(),
    })
    .unwrap();
    client.write_all(request.as_bytes()).await.unwrap();
    client.write_all(b"\n").await.unwrap();

    let snapshots = read_until_terminal(&mut lines).await;
    let terminal = snapshots.last().unwrap();
    assert_eq!(terminal.status, RunStatus::Pass);
    assert_eq!(terminal.procedure.run_passed, Some(true));
    assert_eq!(terminal.procedure.phases.len(), 2);
    assert_eq!(terminal.procedure.phases[0].name, "power_on");
    assert_eq!(terminal.procedure.phases[1].name, "bias_voltage");
    assert_eq!(terminal.procedure.phases[1].outcome, PhaseOutcome::Pass);

    let unit = terminal.procedure.unit_under_test.as_ref().unwrap();
    assert_eq!(unit.serial_number, "00042");
    assert_eq!(unit.part_number.as_deref(), Some("PN-1001"));
    assert_eq!(
        unit.global_trade_item_number.as_deref(),
        Some("00012345678905")
    );

    // Identifier resolution published its three RUNNING states before the
    // first phase appeared.
    assert!(snapshots.len() >= 4);
    assert!(snapshots[0].procedure.phases.is_empty());
}

#[tokio::test]
async fn test_unregistered_unit_reports_unknown() {
    let instrument = MockInstrument::replying("7.000").await;
    let addr = start_server(catalog(instrument.addr)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    send_request(&mut client, 1, UNREGISTERED_LABEL).await;

    let (read_half, _write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let snapshots = read_until_terminal(&mut lines).await;
    let terminal = snapshots.last().unwrap();
    assert_eq!(terminal.status, RunStatus::Unknown);
    assert!(terminal.procedure.phases.is_empty());
    // The label itself decoded, so the unit fields are populated.
    let unit = terminal.procedure.unit_under_test.as_ref().unwrap();
    assert_eq!(unit.global_trade_item_number.as_deref(), Some("99999999999999"));
}

#[tokio::test]
async fn test_failing_measurement_reports_fail() {
    let instrument = MockInstrument::replying("9.000").await;
    let addr = start_server(catalog(instrument.addr)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    send_request(&mut client, 1, GOOD_LABEL).await;

    let (read_half, _write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let snapshots = read_until_terminal(&mut lines).await;
    let terminal = snapshots.last().unwrap();
    assert_eq!(terminal.status, RunStatus::Fail);
    assert_eq!(terminal.procedure.run_passed, Some(false));
    assert_eq!(terminal.procedure.phases[1].outcome, PhaseOutcome::Fail);
}

#[tokio::test]
async fn test_instrument_fault_reports_fail_with_error_phase() {
    let dead = MockInstrument::dead_port().await;
    let addr = start_server(catalog(dead)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    send_request(&mut client, 1, GOOD_LABEL).await;

    let (read_half, _write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let snapshots = read_until_terminal(&mut lines).await;
    let terminal = snapshots.last().unwrap();
    assert_eq!(terminal.status, RunStatus::Fail);
    assert_eq!(terminal.procedure.phases.len(), 1);
    assert_eq!(terminal.procedure.phases[0].outcome, PhaseOutcome::Error);
}

#[tokio::test]
async fn test_every_observer_sees_the_run() {
    let instrument = MockInstrument::replying("7.000").await;
    let addr = start_server(catalog(instrument.addr)).await;

    // A second, passive observer connected before the run starts.
    let watcher = TcpStream::connect(addr).await.unwrap();
    let (watcher_read, _watcher_write) = watcher.into_split();
    let mut watcher_lines = BufReader::new(watcher_read).lines();

    let mut client = TcpStream::connect(addr).await.unwrap();
    send_request(&mut client, 1, GOOD_LABEL).await;
    let (read_half, _write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let driver_snapshots = read_until_terminal(&mut lines).await;
    let watcher_snapshots = read_until_terminal(&mut watcher_lines).await;

    assert_eq!(driver_snapshots.len(), watcher_snapshots.len());
    assert_eq!(
        watcher_snapshots.last().unwrap().status,
        RunStatus::Pass
    );
}
