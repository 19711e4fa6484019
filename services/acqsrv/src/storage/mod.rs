//! Persistence of latest parameter values and unit availability

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;

/// Latest value of one parameter, keyed by name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredParameter {
    pub param_name: String,
    /// Encoding tag (1 float32, 2 scaled int, 3 raw)
    pub type_tag: i64,
    pub value: f64,
    /// Unit that owns the device the value came from
    pub unit_id: String,
}

/// Sink for cycle results
#[async_trait]
pub trait AcquisitionStore: Send + Sync {
    /// Insert or update the row for `parameter.param_name`
    async fn upsert_parameter(&self, parameter: &StoredParameter) -> Result<()>;

    /// Overwrite the availability flag of every unit in `availability`
    async fn replace_availability(&self, availability: &BTreeMap<String, bool>) -> Result<()>;

    async fn load_parameters(&self) -> Result<Vec<StoredParameter>>;

    async fn load_availability(&self) -> Result<BTreeMap<String, bool>>;
}
