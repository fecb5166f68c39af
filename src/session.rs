//! Observer session coordination.
//!
//! Each accepted connection speaks newline-delimited JSON in both
//! directions and runs two concurrent activities for its lifetime:
//!
//! - an inbound loop receiving [`StartRequest`] lines, resolving the unit
//!   under test and its recipe, and driving the sequencer; every
//!   intermediate procedure state is republished through the broker with a
//!   `RUNNING` label, and the terminal state with `PASS` or `FAIL`;
//! - an outbound loop forwarding every broker message to the client, one
//!   JSON line per snapshot.
//!
//! When the client disconnects (either direction) the inbound task is
//! aborted and awaited to completion before the connection is released, so
//! no background run outlives its session.
//!
//! Identifier failures are statuses, not errors: an unparseable label
//! publishes `INVALID`, an unregistered trade item number publishes
//! `UNKNOWN`; both abort the current run and leave the session ready for
//! the next request.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::archive::ArchiveClient;
use crate::broker::ResultBroker;
use crate::catalog::Catalog;
use crate::config::Settings;
use crate::core::{Procedure, RunStatus, Snapshot, UnitUnderTest};
use crate::error::AppResult;
use crate::label::LabelDecoder;
use crate::sequencer::{RecipeSequencer, SnapshotSink};

/// Shared application state, built once at the composition root and cloned
/// into every session. The broker's subscriber set is the only state shared
/// across concurrent sessions.
pub struct AppState {
    pub broker: ResultBroker,
    pub catalog: Arc<dyn Catalog>,
    pub decoder: LabelDecoder,
    pub sequencer: RecipeSequencer,
    pub archive: Option<ArchiveClient>,
}

impl AppState {
    pub fn from_settings(settings: &Settings, catalog: Arc<dyn Catalog>) -> AppResult<Self> {
        Ok(Self {
            broker: ResultBroker::new(),
            catalog,
            decoder: LabelDecoder::new(&settings.label.pattern)?,
            sequencer: RecipeSequencer::new(settings.instrument.timeouts()),
            archive: ArchiveClient::from_settings(&settings.archive),
        })
    }
}

/// One inbound client message: which procedure to run against which
/// scanned label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub procedure_id: i64,
    pub label: String,
}

/// Adapts the broker onto the sequencer's snapshot seam: every
/// intermediate state goes out tagged `RUNNING`.
struct BrokerSink {
    broker: ResultBroker,
}

#[async_trait]
impl SnapshotSink for BrokerSink {
    async fn emit(&self, procedure: &Procedure) {
        self.broker
            .publish(Snapshot::new(procedure, RunStatus::Running).encode())
            .await;
    }
}

/// Accept observer connections forever, one session task per connection.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> AppResult<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "observer connected");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_connection(stream, state).await;
            info!(%peer, "observer disconnected");
        });
    }
}

/// Run one observer session to completion.
pub async fn handle_connection(stream: TcpStream, state: Arc<AppState>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut subscription = state.broker.subscribe();
    let mut inbound = tokio::spawn(inbound_loop(read_half, Arc::clone(&state)));

    loop {
        tokio::select! {
            _ = &mut inbound => break,
            message = subscription.recv() => {
                let Some(message) = message else { break };
                if write_line(&mut write_half, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    // Cancel the receiver and await it before the connection is released.
    inbound.abort();
    let _ = inbound.await;
}

async fn write_line(write_half: &mut OwnedWriteHalf, message: &str) -> std::io::Result<()> {
    write_half.write_all(message.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.flush().await
}

async fn inbound_loop(read_half: OwnedReadHalf, state: Arc<AppState>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let request: StartRequest = match serde_json::from_str(line) {
                    Ok(request) => request,
                    Err(err) => {
                        warn!(%err, "discarding malformed request");
                        continue;
                    }
                };
                // A failed run never tears the session down.
                if let Err(err) = run_procedure(&state, request).await {
                    warn!(%err, "run aborted");
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "inbound read failed");
                break;
            }
        }
    }
}

async fn publish(state: &AppState, procedure: &Procedure, status: RunStatus) {
    state
        .broker
        .publish(Snapshot::new(procedure, status).encode())
        .await;
}

/// Drive one test run from scanned label to terminal snapshot.
async fn run_procedure(state: &AppState, request: StartRequest) -> AppResult<()> {
    let Some(info) = state.catalog.procedure(request.procedure_id).await? else {
        warn!(procedure_id = request.procedure_id, "unknown procedure id");
        return Ok(());
    };
    let mut procedure = Procedure::new(info.pid.clone(), info.name.clone());
    procedure.unit_under_test = Some(UnitUnderTest::default());
    publish(state, &procedure, RunStatus::Running).await;

    let Some(label) = state.decoder.decode(&request.label) else {
        procedure.mark_failed();
        publish(state, &procedure, RunStatus::Invalid).await;
        return Ok(());
    };
    if let Some(unit) = procedure.unit_under_test.as_mut() {
        unit.serial_number = label.serial_number.clone();
        unit.global_trade_item_number = Some(label.global_trade_item_number.clone());
        unit.batch_number = label.manufacture_date.clone();
    }
    publish(state, &procedure, RunStatus::Running).await;

    let Some(part) = state
        .catalog
        .part_by_gtin(&label.global_trade_item_number)
        .await?
    else {
        procedure.mark_failed();
        publish(state, &procedure, RunStatus::Unknown).await;
        return Ok(());
    };
    if let Some(unit) = procedure.unit_under_test.as_mut() {
        unit.part_number = Some(part.number.clone());
        unit.part_name = Some(part.name.clone());
        unit.revision = part.revision.clone();
    }
    publish(state, &procedure, RunStatus::Running).await;

    let records = state.catalog.recipe(part.id, info.id).await?;
    let sink = BrokerSink {
        broker: state.broker.clone(),
    };
    state.sequencer.run(&mut procedure, &records, &sink).await;

    procedure.finalize();
    let status = if procedure.passed() {
        RunStatus::Pass
    } else {
        RunStatus::Fail
    };
    publish(state, &procedure, status).await;

    if let Some(archive) = &state.archive {
        if let Err(err) = archive.post(&procedure).await {
            warn!(%err, "archive post failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_wire_format() {
        let request: StartRequest =
            serde_json::from_str(r#"{"procedure_id": 1, "label": "0100012345678905112503192100042"}"#)
                .unwrap();
        assert_eq!(request.procedure_id, 1);
        assert_eq!(request.label, "0100012345678905112503192100042");
    }

    #[tokio::test]
    async fn test_broker_sink_tags_running() {
        let broker = ResultBroker::new();
        let mut sub = broker.subscribe();
        let sink = BrokerSink {
            broker: broker.clone(),
        };
        let procedure = Procedure::new("FVT01", "Multi-coil Check");
        sink.emit(&procedure).await;

        let message = sub.recv().await.unwrap();
        let snapshot: Snapshot = serde_json::from_str(&message).unwrap();
        assert_eq!(snapshot.status, RunStatus::Running);
        assert_eq!(snapshot.procedure.procedure_id, "FVT01");
    }
}
