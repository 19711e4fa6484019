use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, SqlitePool,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{AcquisitionStore, StoredParameter};
use crate::error::{AcqError, Result};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS static_params (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        param_name TEXT NOT NULL UNIQUE,
        type INTEGER NOT NULL,
        value REAL NOT NULL,
        equipment_id TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS units (
        unit_id TEXT PRIMARY KEY,
        availability BOOLEAN NOT NULL
    )
    "#,
];

/// SQLite-backed store for parameter values and unit availability
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and its tables
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AcqError::storage(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!("SQLite database connected: {}", db_path.display());
        Self::from_pool(pool).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        // A single connection that never expires, otherwise each connection
        // would see its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AcquisitionStore for SqliteStore {
    async fn upsert_parameter(&self, parameter: &StoredParameter) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE static_params SET value = ? WHERE param_name = ?")
            .bind(parameter.value)
            .bind(&parameter.param_name)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            sqlx::query(
                "INSERT INTO static_params (param_name, type, value, equipment_id) VALUES (?, ?, ?, ?)",
            )
            .bind(&parameter.param_name)
            .bind(parameter.type_tag)
            .bind(parameter.value)
            .bind(&parameter.unit_id)
            .execute(&mut *tx)
            .await?;
            debug!("Inserted {} = {}", parameter.param_name, parameter.value);
        } else {
            debug!("Updated {} = {}", parameter.param_name, parameter.value);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn replace_availability(&self, availability: &BTreeMap<String, bool>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (unit_id, available) in availability {
            sqlx::query(
                r#"
                INSERT INTO units (unit_id, availability)
                VALUES (?, ?)
                ON CONFLICT(unit_id) DO UPDATE SET
                    availability = excluded.availability
                "#,
            )
            .bind(unit_id)
            .bind(*available)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_parameters(&self) -> Result<Vec<StoredParameter>> {
        let rows = sqlx::query(
            "SELECT param_name, type, value, equipment_id FROM static_params ORDER BY param_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut parameters = Vec::with_capacity(rows.len());
        for row in rows {
            parameters.push(StoredParameter {
                param_name: row.try_get("param_name")?,
                type_tag: row.try_get("type")?,
                value: row.try_get("value")?,
                unit_id: row.try_get("equipment_id")?,
            });
        }
        Ok(parameters)
    }

    async fn load_availability(&self) -> Result<BTreeMap<String, bool>> {
        let rows = sqlx::query("SELECT unit_id, availability FROM units")
            .fetch_all(&self.pool)
            .await?;

        let mut availability = BTreeMap::new();
        for row in rows {
            availability.insert(row.try_get("unit_id")?, row.try_get("availability")?);
        }
        Ok(availability)
    }
}
