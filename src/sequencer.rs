//! Recipe sequencing: turning an ordered list of recipe records into a
//! fully populated [`Procedure`], one phase at a time.
//!
//! Records are grouped into runs by phase name in order of first
//! appearance, so rows for one phase always land in one [`Phase`] no matter
//! how the upstream query ordered them, record order within a phase is
//! preserved, and an input that is already contiguous executes its phases
//! in exactly the input order.
//!
//! Every record is executed over a fresh [`InstrumentLink`] that is closed
//! on every exit path. Query records read a response back, parse it as a
//! number, and check it against the tolerance window; an out-of-tolerance
//! value downgrades the phase to FAIL and the run continues. Any instrument
//! or parse fault downgrades the phase to ERROR and aborts the entire run;
//! no further records or phases execute.
//!
//! A snapshot is emitted through the injected [`SnapshotSink`] after the
//! phase opens, after every record, and after the phase closes, in exactly
//! the order states are produced.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{
    MeasuredValue, Measurement, MeasurementOutcome, Phase, PhaseOutcome, Procedure, RecipeRecord,
};
use crate::error::{AppResult, HtfError};
use crate::instrument::{InstrumentLink, LinkTimeouts, LINE_TERMINATOR};
use crate::tolerance;

/// Receiver for intermediate procedure states. The session layer adapts
/// this onto the broker; tests collect states directly.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn emit(&self, procedure: &Procedure);
}

/// Drives recipe records against instruments and aggregates outcomes.
#[derive(Clone, Copy, Debug)]
pub struct RecipeSequencer {
    timeouts: LinkTimeouts,
}

impl RecipeSequencer {
    pub fn new(timeouts: LinkTimeouts) -> Self {
        Self { timeouts }
    }

    /// Execute all records, appending phases to `procedure` as they run.
    /// On return the procedure is terminal for this recipe: either every
    /// phase executed, or an instrument fault aborted the run early and
    /// trailing phases are entirely absent.
    pub async fn run(
        &self,
        procedure: &mut Procedure,
        records: &[RecipeRecord],
        sink: &dyn SnapshotSink,
    ) {
        for run in grouped_runs(records) {
            let phase_name = run[0].phase_name.clone();
            procedure.phases.push(Phase::begin(&phase_name));
            sink.emit(procedure).await;

            for record in run {
                match self.execute(procedure, record).await {
                    Ok(()) => sink.emit(procedure).await,
                    Err(err) => {
                        warn!(phase = %phase_name, error = %err, "aborting run");
                        if let Some(phase) = procedure.current_phase_mut() {
                            phase.outcome = PhaseOutcome::Error;
                            phase.finish();
                        }
                        procedure.mark_failed();
                        sink.emit(procedure).await;
                        return;
                    }
                }
            }

            if let Some(phase) = procedure.current_phase_mut() {
                phase.finish();
            }
            sink.emit(procedure).await;
        }
    }

    /// Execute one record over a scoped instrument link, then honor its
    /// inter-command delay.
    async fn execute(&self, procedure: &mut Procedure, record: &RecipeRecord) -> AppResult<()> {
        let mut link = InstrumentLink::open(
            &record.instrument_hostname,
            record.instrument_port,
            self.timeouts,
        )
        .await?;
        let driven = self.drive(&mut link, procedure, record).await;
        let closed = link.close().await;
        driven?;
        closed?;

        if record.command_delay_millis > 0 {
            tokio::time::sleep(Duration::from_millis(record.command_delay_millis)).await;
        }
        Ok(())
    }

    async fn drive(
        &self,
        link: &mut InstrumentLink,
        procedure: &mut Procedure,
        record: &RecipeRecord,
    ) -> AppResult<()> {
        let mut command = record.command_text.clone().into_bytes();
        command.push(LINE_TERMINATOR);

        let Some(measurement_name) = &record.measurement_name else {
            return link.send(&command).await;
        };

        let response = link.query(&command).await?;
        let text = std::str::from_utf8(&response)?.trim();
        let value: f64 = text.parse().map_err(|_| HtfError::ResponseParse {
            response: text.to_string(),
        })?;

        let (Some(lower), Some(upper)) = (
            record.measurement_lower_limit,
            record.measurement_upper_limit,
        ) else {
            // A query step without a window is a recipe defect, not a FAIL.
            return Err(HtfError::Configuration(format!(
                "measurement {measurement_name} has no tolerance window"
            )));
        };
        let precision = record.measurement_precision.unwrap_or(0);
        let outcome = tolerance::evaluate(value, lower, upper, precision);
        debug!(measurement = %measurement_name, value, ?outcome, "evaluated");

        let failed = outcome != MeasurementOutcome::Pass;
        if let Some(phase) = procedure.current_phase_mut() {
            phase.measurements.push(Measurement {
                name: measurement_name.clone(),
                outcome,
                measured_value: Some(MeasuredValue::Number(value)),
                units: record.measurement_units.clone(),
                lower_limit: Some(lower),
                upper_limit: Some(upper),
                validators: None,
                docstring: None,
            });
            if failed {
                phase.outcome = PhaseOutcome::Fail;
            }
        }
        if failed {
            procedure.mark_failed();
        }
        Ok(())
    }
}

/// Group records into runs by phase name, phases ordered by first
/// appearance. Equal-named rows always end up in one run with their
/// relative order intact, even when the upstream ordering split them.
fn grouped_runs(records: &[RecipeRecord]) -> Vec<Vec<&RecipeRecord>> {
    let mut runs: Vec<Vec<&RecipeRecord>> = Vec::new();
    for record in records {
        match runs
            .iter_mut()
            .find(|run| run[0].phase_name == record.phase_name)
        {
            Some(run) => run.push(record),
            None => runs.push(vec![record]),
        }
    }
    runs
}
