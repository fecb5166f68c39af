//! Configuration-data collaborator.
//!
//! The relational store holding commands, instruments, measurements, parts,
//! phases, procedures, and recipes lives outside this engine. [`Catalog`]
//! is the read-only seam the engine consumes: resolve a procedure
//! definition, resolve a part by its global trade item number, and fetch
//! the ordered recipe rows for a (part, procedure) pair.
//!
//! [`TomlCatalog`] is the shipped implementation: the whole catalog
//! deserialized from one TOML file at startup.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::RecipeRecord;
use crate::error::{AppResult, HtfError};

/// A part definition resolved from a scanned trade item number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub id: i64,
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub revision: Option<String>,
    pub global_trade_item_number: String,
}

/// A procedure (test definition) a client can request by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureRecord {
    pub id: i64,
    /// External procedure identifier, e.g. "FVT01".
    pub pid: String,
    pub name: String,
}

/// One recipe row bound to a (part, procedure) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecipeRow {
    pub part_id: i64,
    pub procedure_id: i64,
    #[serde(flatten)]
    pub record: RecipeRecord,
}

/// Read-only queries the engine needs from the configuration store.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolve a procedure definition by its numeric id.
    async fn procedure(&self, procedure_id: i64) -> AppResult<Option<ProcedureRecord>>;

    /// Resolve the part registered under a global trade item number.
    async fn part_by_gtin(&self, gtin: &str) -> AppResult<Option<PartRecord>>;

    /// The ordered recipe rows for a (part, procedure) pair.
    async fn recipe(&self, part_id: i64, procedure_id: i64) -> AppResult<Vec<RecipeRecord>>;
}

/// In-memory catalog loaded from a single TOML file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlCatalog {
    #[serde(default)]
    pub procedures: Vec<ProcedureRecord>,
    #[serde(default)]
    pub parts: Vec<PartRecord>,
    #[serde(default)]
    pub recipes: Vec<RecipeRow>,
}

impl TomlCatalog {
    /// Load and parse the catalog file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            HtfError::Catalog(format!("failed to parse {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl Catalog for TomlCatalog {
    async fn procedure(&self, procedure_id: i64) -> AppResult<Option<ProcedureRecord>> {
        Ok(self
            .procedures
            .iter()
            .find(|p| p.id == procedure_id)
            .cloned())
    }

    async fn part_by_gtin(&self, gtin: &str) -> AppResult<Option<PartRecord>> {
        Ok(self
            .parts
            .iter()
            .find(|p| p.global_trade_item_number == gtin)
            .cloned())
    }

    async fn recipe(&self, part_id: i64, procedure_id: i64) -> AppResult<Vec<RecipeRecord>> {
        Ok(self
            .recipes
            .iter()
            .filter(|r| r.part_id == part_id && r.procedure_id == procedure_id)
            .map(|r| r.record.clone())
            .collect())
    }
}
