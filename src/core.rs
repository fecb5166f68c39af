//! Core data types for the test execution engine.
//!
//! This module defines the hierarchical result model produced by a test run
//! and the flat recipe records that drive it:
//!
//! - [`Procedure`]: the full result of one run for one unit, owning all phases
//! - [`Phase`]: a named group of steps with an aggregate outcome and timing
//! - [`Measurement`]: a single tolerance-checked reading taken during a phase
//! - [`UnitUnderTest`]: the physical item being validated
//! - [`RecipeRecord`]: one configured instrument-command step
//!
//! # Outcome aggregation
//!
//! A phase starts out `PASS` and is only ever downgraded (`FAIL` on an
//! out-of-tolerance measurement, `ERROR` on an instrument fault), never
//! upgraded. A procedure's `run_passed` is tri-state: unset until the first
//! downgrade or until finalization promotes it to `true`.
//!
//! All outcome enums serialize as their bare string names so observers see
//! `"PASS"`, `"FAIL"`, etc. on the wire.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Outcome of a single measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MeasurementOutcome {
    Pass,
    Fail,
    Unset,
}

/// Aggregate outcome of a phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PhaseOutcome {
    Pass,
    Fail,
    Skip,
    Error,
}

/// Run-status label paired with every published procedure snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Invalid,
    Unknown,
    Fail,
    Pass,
}

/// A measured value: numeric for tolerance-checked readings, text for
/// categorical ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasuredValue {
    Number(f64),
    Text(String),
}

/// A single reading taken during a phase. Immutable after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub outcome: MeasurementOutcome,
    pub measured_value: Option<MeasuredValue>,
    pub units: Option<String>,
    pub lower_limit: Option<f64>,
    pub upper_limit: Option<f64>,
    pub validators: Option<Vec<String>>,
    pub docstring: Option<String>,
}

/// A named, ordered group of test steps sharing one purpose.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub outcome: PhaseOutcome,
    pub start_time_millis: i64,
    pub end_time_millis: Option<i64>,
    pub measurements: Vec<Measurement>,
    pub docstring: Option<String>,
}

impl Phase {
    /// Open a new phase with an optimistic `PASS` outcome and the clock
    /// started.
    pub fn begin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: PhaseOutcome::Pass,
            start_time_millis: now_millis(),
            end_time_millis: None,
            measurements: Vec::new(),
            docstring: None,
        }
    }

    /// Stamp the end of the phase.
    pub fn finish(&mut self) {
        self.end_time_millis = Some(now_millis());
    }
}

/// The physical item being validated, identified by a scanned label.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitUnderTest {
    pub serial_number: String,
    pub part_number: Option<String>,
    pub part_name: Option<String>,
    pub revision: Option<String>,
    pub batch_number: Option<String>,
    pub global_trade_item_number: Option<String>,
}

/// The full hierarchical result of one test run for one unit.
///
/// Exclusively owned by one session for the lifetime of one run; phases are
/// append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub procedure_id: String,
    pub procedure_name: String,
    pub unit_under_test: Option<UnitUnderTest>,
    pub phases: Vec<Phase>,
    pub run_passed: Option<bool>,
}

impl Procedure {
    pub fn new(procedure_id: impl Into<String>, procedure_name: impl Into<String>) -> Self {
        Self {
            procedure_id: procedure_id.into(),
            procedure_name: procedure_name.into(),
            unit_under_test: None,
            phases: Vec::new(),
            run_passed: None,
        }
    }

    /// The phase currently executing, if any.
    pub fn current_phase_mut(&mut self) -> Option<&mut Phase> {
        self.phases.last_mut()
    }

    /// Downgrade the run; never upgraded afterwards.
    pub fn mark_failed(&mut self) {
        self.run_passed = Some(false);
    }

    /// Promote an untouched run to passing once it is terminal.
    pub fn finalize(&mut self) {
        if self.run_passed != Some(false) {
            self.run_passed = Some(true);
        }
    }

    /// True unless some phase downgraded the run.
    pub fn passed(&self) -> bool {
        self.run_passed != Some(false)
    }
}

/// One configured instrument-command step of a recipe.
///
/// Rows carrying a `measurement_name` are query steps: the command response
/// is read back, parsed, and checked against the tolerance window. Rows
/// without one are fire-and-forget sends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub phase_name: String,
    pub instrument_hostname: String,
    pub instrument_port: u16,
    pub command_text: String,
    #[serde(default)]
    pub command_delay_millis: u64,
    #[serde(default)]
    pub measurement_name: Option<String>,
    #[serde(default)]
    pub measurement_units: Option<String>,
    #[serde(default)]
    pub measurement_lower_limit: Option<f64>,
    #[serde(default)]
    pub measurement_upper_limit: Option<f64>,
    #[serde(default)]
    pub measurement_precision: Option<u32>,
}

impl RecipeRecord {
    /// Query steps carry a measurement definition; send-only steps do not.
    pub fn is_query(&self) -> bool {
        self.measurement_name.is_some()
    }
}

/// One live-update wire message: a procedure state paired with a run-status
/// label, serialized as a two-element JSON array.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub procedure: Procedure,
    pub status: RunStatus,
}

impl Snapshot {
    pub fn new(procedure: &Procedure, status: RunStatus) -> Self {
        Self {
            procedure: procedure.clone(),
            status,
        }
    }

    /// Serialize to the wire form, e.g. `[{...}, "RUNNING"]`.
    pub fn encode(&self) -> String {
        // Procedure and RunStatus both serialize infallibly.
        serde_json::to_string(&(&self.procedure, &self.status)).unwrap_or_default()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.procedure, &self.status).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (procedure, status) = <(Procedure, RunStatus)>::deserialize(deserializer)?;
        Ok(Self { procedure, status })
    }
}
