//! Read access to the PTO balances kept in the relational datastore.
//!
//! The datastore is owned by another system; this crate only ever reads the
//! full set of records.

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info};

/// A single employee's PTO balance as stored in the datastore. The balance
/// column is nullable.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PtoRecord {
    pub employee_id: String,
    pub balance: Option<f64>,
}

impl PtoRecord {
    pub fn new(employee_id: impl Into<String>, balance: f64) -> Self {
        PtoRecord {
            employee_id: employee_id.into(),
            balance: Some(balance),
        }
    }

    pub fn without_balance(employee_id: impl Into<String>) -> Self {
        PtoRecord {
            employee_id: employee_id.into(),
            balance: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to acquire datastore connection - {0}")]
    Connection(#[source] sqlx::Error),
    #[error("query for PTO records failed - {0}")]
    Query(#[source] sqlx::Error),
}

/// Source of PTO records.
#[async_trait]
pub trait PtoRepository: Send + Sync {
    /// Returns every PTO record currently stored, ordered by employee id.
    async fn fetch_all(&self) -> Result<Vec<PtoRecord>, StorageError>;
}

/// Postgres backed [PtoRepository].
pub struct PgPtoRepository {
    pool: PgPool,
    select_all: String,
}

impl PgPtoRepository {
    /// Builds the repository without opening a connection. Connections are
    /// opened on first use and handed out one per invocation.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        table: &str,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(StorageError::Connection)?;
        Ok(Self::with_pool(pool, table))
    }

    /// `table` must already be validated as a plain SQL identifier.
    pub fn with_pool(pool: PgPool, table: &str) -> Self {
        PgPtoRepository {
            pool,
            select_all: select_all_query(table),
        }
    }
}

fn select_all_query(table: &str) -> String {
    format!(
        "SELECT CAST(employee_id AS TEXT) AS employee_id, \
         CAST(balance AS DOUBLE PRECISION) AS balance \
         FROM {table} ORDER BY employee_id"
    )
}

#[async_trait]
impl PtoRepository for PgPtoRepository {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn fetch_all(&self) -> Result<Vec<PtoRecord>, StorageError> {
        // released back to the pool when the invocation's query is done
        let mut conn = self.pool.acquire().await.map_err(StorageError::Connection)?;
        debug!("Acquired datastore connection");

        let records: Vec<PtoRecord> = sqlx::query_as::<_, PtoRecord>(&self.select_all)
            .fetch(&mut *conn)
            .try_collect()
            .await
            .map_err(StorageError::Query)?;

        info!("Fetched {} PTO records", records.len());
        Ok(records)
    }
}

/// Checks that `name` is safe to splice into a query as a table reference:
/// one or two dot separated identifiers made of ASCII letters, digits and
/// underscores, not starting with a digit.
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}
