//! `PostgreSQL` durable store.
//!
//! `PostgreSQL` is the authoritative store. Each customer owns one table per
//! entity type (`{customer}_{type}`, see [`table_name`]) with an `id` primary
//! key and the full entity as a `record` JSONB column. Those tables are
//! provisioned outside this crate. The bundled migrations create the shared
//! tables this adapter reads:
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `customers` | Customer records (`id`, `record`) |
//! | `entity_index` | beID -> (customer, type, id) |
//! | `entity_values` | Time-stamped values per beID (first timestamp lookups) |
//!
//! Queries are built at runtime; table names cannot be bound as parameters,
//! so they are validated by [`table_name`] and quoted.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use strata_types::{CustomerInfo, Entity, EntityType};

use crate::adapter::{DurableStore, table_name};
use crate::config::DurableConfig;
use crate::error::{CacheError, CacheResult};

/// `SQLSTATE` for a missing relation.
const UNDEFINED_TABLE: &str = "42P01";

/// Connection pool handle to `PostgreSQL`, usable as a [`DurableStore`].
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Open a pool sized and timed by the `durable` config section.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for an unparsable URL, or
    /// [`CacheError::Postgres`] if no connection can be established.
    pub async fn connect(durable: &DurableConfig) -> CacheResult<Self> {
        let options: PgConnectOptions = durable
            .url
            .parse()
            .map_err(|e: sqlx::Error| CacheError::Config(format!("Invalid durable store URL: {e}")))?;

        let pool = PgPoolOptions::new()
            .max_connections(durable.max_connections)
            .acquire_timeout(Duration::from_secs(durable.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(durable.idle_timeout_secs))
            .connect_with(options)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "PostgreSQL connection failed"))?;

        tracing::info!(
            pool_size = durable.max_connections,
            "PostgreSQL durable store connected"
        );
        Ok(Self { pool })
    }

    /// Open a pool for `url` with the default pool settings.
    ///
    /// # Errors
    ///
    /// See [`PostgresPool::connect`].
    pub async fn connect_url(url: &str) -> CacheResult<Self> {
        Self::connect(&DurableConfig {
            url: url.to_owned(),
            ..DurableConfig::default()
        })
        .await
    }

    /// Run all pending migrations from the `migrations/` directory.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> CacheResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Return a reference to the underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }

    async fn record_in(&self, table: &str, id: &str) -> CacheResult<Option<Entity>> {
        let sql = format!(r#"SELECT record FROM "{table}" WHERE id = $1"#);
        let row = match sqlx::query_scalar::<_, Json<Entity>>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(e) if is_undefined_table(&e) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(row.map(|Json(entity)| entity))
    }
}

fn is_undefined_table(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNDEFINED_TABLE)
}

#[async_trait]
impl DurableStore for PostgresPool {
    async fn scan(&self, table: &str) -> CacheResult<Vec<Entity>> {
        let sql = format!(r#"SELECT record FROM "{table}""#);
        match sqlx::query_scalar::<_, Json<Entity>>(&sql)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => Ok(rows.into_iter().map(|Json(entity)| entity).collect()),
            Err(e) if is_undefined_table(&e) => {
                tracing::debug!(table, "Table not provisioned, treating as empty");
                Ok(Vec::new())
            }
            Err(e) => {
                tracing::error!(table, error = %e, "Durable scan failed");
                Err(e.into())
            }
        }
    }

    async fn entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<Entity>> {
        let table = table_name(customer, entity_type)?;
        self.record_in(&table, id).await
    }

    async fn entity_by_be_id(&self, be_id: &str) -> CacheResult<Option<Entity>> {
        let row: Option<(String, i16, String)> = sqlx::query_as(
            "SELECT customer, entity_type, entity_id FROM entity_index WHERE be_id = $1",
        )
        .bind(be_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((customer, raw_type, id)) = row else {
            return Ok(None);
        };
        let entity_type = u16::try_from(raw_type)
            .map(EntityType)
            .map_err(|e| CacheError::Config(format!("invalid entity_type for {be_id}: {e}")))?;
        let mut found = self.entity(&customer, &id, entity_type).await?;
        if let Some(entity) = found.as_mut() {
            entity.tag(entity_type, &customer);
        }
        Ok(found)
    }

    async fn update_entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
        fields: Map<String, Value>,
    ) -> CacheResult<Option<Entity>> {
        let table = table_name(customer, entity_type)?;
        let sql = format!(r#"UPDATE "{table}" SET record = record || $2 WHERE id = $1 RETURNING record"#);
        let row: Option<Json<Entity>> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(Json(Value::Object(fields)))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|Json(entity)| entity))
    }

    async fn first_timestamp(&self, customer: &str, be_id: &str) -> CacheResult<Option<i64>> {
        let first: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(ts) FROM entity_values WHERE customer = $1 AND be_id = $2",
        )
        .bind(customer)
        .bind(be_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(first)
    }

    async fn customer(&self, customer: &str) -> CacheResult<Option<CustomerInfo>> {
        let row: Option<Json<CustomerInfo>> =
            sqlx::query_scalar("SELECT record FROM customers WHERE id = $1")
                .bind(customer)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(info)| info))
    }
}
