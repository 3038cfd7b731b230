//! Order submission pipeline
//!
//! Turns an approved order into a durable, named record that expires after a
//! while. Confirmation is handled before this point; the pipeline only
//! validates and stores.

use crate::error::OrchestrationError;
use crate::models::Beverage;
use crate::Result;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

const NAME_ATTRIBUTES: &[&str] = &[
    "Amazing",
    "Spectacular",
    "Wonderful",
    "Fantastic",
    "Incredible",
    "Outstanding",
    "Exceptional",
    "Marvelous",
    "Terrific",
    "Phenomenal",
];

const NAME_ANIMALS: &[&str] = &[
    "Aardvark",
    "Badger",
    "Capybara",
    "Dingo",
    "Emu",
    "Ferret",
    "Giraffe",
    "Hippopotamus",
    "Iguana",
    "Jaguar",
    "Kangaroo",
    "Lion",
    "Meerkat",
    "Narwhal",
    "Ostrich",
    "Penguin",
    "Quail",
    "Rhinoceros",
    "Snake",
    "Tiger",
    "Unicorn",
    "Vaquita",
    "Wallaby",
    "Xenoceratops",
    "Yak",
    "Zebra",
];

/// Random collection name such as `Fantastic Narwhal`.
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let attribute = NAME_ATTRIBUTES.choose(&mut rng).copied().unwrap_or("Amazing");
    let animal = NAME_ANIMALS.choose(&mut rng).copied().unwrap_or("Aardvark");
    format!("{} {}", attribute, animal)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedOrder {
    pub order_id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub beverages: Vec<Beverage>,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SubmittedOrder {
    pub fn new(
        owner_id: &str,
        name: &str,
        beverages: &[Beverage],
        expiry: chrono::Duration,
    ) -> Result<Self> {
        if beverages.is_empty() {
            return Err(OrchestrationError::ValidationError(
                "Cannot submit an empty order".to_string(),
            ));
        }
        if owner_id.is_empty() {
            return Err(OrchestrationError::AuthError(
                "Orders must be submitted by an authenticated user".to_string(),
            ));
        }

        let submitted_at = Utc::now();
        Ok(Self {
            order_id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            beverages: beverages.to_vec(),
            submitted_at,
            expires_at: submitted_at + expiry,
        })
    }

    /// Human readable receipt returned to the caller.
    pub fn receipt(&self) -> String {
        format!("Order ID : {} with name: {}", self.order_id, self.name)
    }
}

/// Durable storage for submitted orders, grouped by owner.
#[async_trait::async_trait]
pub trait SubmittedOrderStore: Send + Sync {
    /// Store the order and return its receipt.
    async fn submit_order(&self, owner_id: &str, name: &str, beverages: &[Beverage])
        -> Result<String>;

    async fn list_orders(&self, owner_id: &str) -> Result<Vec<SubmittedOrder>>;
}

pub struct InMemorySubmittedOrderStore {
    orders: Arc<RwLock<HashMap<String, Vec<SubmittedOrder>>>>,
    expiry: chrono::Duration,
}

impl InMemorySubmittedOrderStore {
    pub fn new(expiry: chrono::Duration) -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            expiry,
        }
    }
}

impl Default for InMemorySubmittedOrderStore {
    fn default() -> Self {
        Self::new(chrono::Duration::hours(12))
    }
}

#[async_trait::async_trait]
impl SubmittedOrderStore for InMemorySubmittedOrderStore {
    async fn submit_order(
        &self,
        owner_id: &str,
        name: &str,
        beverages: &[Beverage],
    ) -> Result<String> {
        let order = SubmittedOrder::new(owner_id, name, beverages, self.expiry)?;
        let receipt = order.receipt();

        let mut orders = self.orders.write().await;
        orders
            .entry(owner_id.to_string())
            .or_insert_with(Vec::new)
            .push(order);

        Ok(receipt)
    }

    async fn list_orders(&self, owner_id: &str) -> Result<Vec<SubmittedOrder>> {
        let orders = self.orders.read().await;
        Ok(orders.get(owner_id).cloned().unwrap_or_default())
    }
}

pub struct PostgresSubmittedOrderStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    expiry: chrono::Duration,
}

impl PostgresSubmittedOrderStore {
    pub fn new(pool: PgPool, expiry: chrono::Duration) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            expiry,
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS submitted_orders (
                      order_id UUID PRIMARY KEY,
                      owner_id TEXT NOT NULL,
                      name TEXT NOT NULL,
                      beverages JSONB NOT NULL,
                      submitted_at TIMESTAMPTZ NOT NULL,
                      expires_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_submitted_orders_owner_time
                    ON submitted_orders (owner_id, submitted_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::PersistenceError(format!(
                    "Failed to initialize submitted order schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SubmittedOrderStore for PostgresSubmittedOrderStore {
    async fn submit_order(
        &self,
        owner_id: &str,
        name: &str,
        beverages: &[Beverage],
    ) -> Result<String> {
        let order = SubmittedOrder::new(owner_id, name, beverages, self.expiry)?;
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO submitted_orders
              (order_id, owner_id, name, beverages, submitted_at, expires_at)
            VALUES
              ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.order_id)
        .bind(&order.owner_id)
        .bind(&order.name)
        .bind(Json(&order.beverages))
        .bind(order.submitted_at)
        .bind(order.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::PersistenceError(format!("Failed to store submitted order: {}", e))
        })?;

        Ok(order.receipt())
    }

    async fn list_orders(&self, owner_id: &str) -> Result<Vec<SubmittedOrder>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT order_id, name, beverages, submitted_at, expires_at
            FROM submitted_orders
            WHERE owner_id = $1
            ORDER BY submitted_at ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::PersistenceError(format!("Failed to load submitted orders: {}", e))
        })?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let beverages: Json<Vec<Beverage>> = match row.try_get("beverages") {
                Ok(beverages) => beverages,
                Err(error) => {
                    warn!("Skipping unreadable submitted order: {}", error);
                    continue;
                }
            };

            orders.push(SubmittedOrder {
                order_id: row.try_get("order_id").unwrap_or_else(|_| Uuid::new_v4()),
                owner_id: owner_id.to_string(),
                name: row.try_get("name").unwrap_or_default(),
                beverages: beverages.0,
                submitted_at: row.try_get("submitted_at").unwrap_or_else(|_| Utc::now()),
                expires_at: row.try_get("expires_at").unwrap_or_else(|_| Utc::now()),
            });
        }

        Ok(orders)
    }
}

/// Postgres when a database URL is configured and the pool can be created,
/// in-memory otherwise.
pub fn build_submitted_order_store(
    database_url: Option<&str>,
    expiry: chrono::Duration,
) -> Arc<dyn SubmittedOrderStore> {
    if let Some(url) = database_url {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
        {
            Ok(pool) => {
                info!("Submitted order backend: postgres");
                return Arc::new(PostgresSubmittedOrderStore::new(pool, expiry));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres order backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Submitted order backend: in-memory");
    Arc::new(InMemorySubmittedOrderStore::new(expiry))
}
