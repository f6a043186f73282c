pub mod error;
pub mod genre;
pub mod movie;
pub mod query;

use std::fmt::Display;

pub use error::Error;
pub use sqlx::Error as SqlxError;
use serde::Serialize;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::debug;

use crate::error::Result;

pub type ChosenDB = sqlx::Sqlite;
pub type Pool = sqlx::Pool<ChosenDB>;

pub const MAX_LIMIT: usize = 10_000;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Connection options every pool must use, text search relies on the `REGEXP` function.
pub fn connect_options(database_url: &str) -> Result<SqliteConnectOptions> {
    let options = database_url
        .parse::<SqliteConnectOptions>()?
        .foreign_keys(true)
        .with_regexp();
    Ok(options)
}

pub async fn new_pool(database_url: &str) -> Result<Pool, Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(50)
        .connect_with(connect_options(database_url)?)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &Pool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    debug!("Database schema is up to date");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    Asc(String),
    Desc(String),
}

impl Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Order::Asc(s) => write!(f, "{}", s),
            Order::Desc(s) => write!(f, "{} DESC", s),
        }
    }
}

impl AsRef<str> for Order {
    fn as_ref(&self) -> &str {
        match self {
            Order::Asc(s) => s.as_str(),
            Order::Desc(s) => s.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListingParams {
    pub offset: i64,
    pub limit: i64,
    pub order: Option<Vec<Order>>,
}

impl Default for ListingParams {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: MAX_LIMIT as i64,
            order: None,
        }
    }
}

impl ListingParams {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset,
            limit,
            order: None,
        }
    }
    pub fn with_order(mut self, order: Vec<Order>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn ordering(&self, valid_fields: &[&str]) -> Result<String> {
        let ordering = self
            .order
            .as_ref()
            .map(|o| {
                o.iter()
                    .map(|o| {
                        if valid_fields.contains(&o.as_ref()) {
                            Ok(o.to_string())
                        } else {
                            Err(Error::InvalidOrderByField(o.as_ref().to_string()))
                        }
                    })
                    .collect::<Result<Vec<String>>>()
                    .map(|o| o.join(", "))
            })
            .transpose()?
            .unwrap_or_default();
        Ok(ordering)
    }
}

/// One page of records plus the total count of records matching the query.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Batch<T> {
    pub offset: i64,
    pub limit: i64,
    pub total: u64,
    pub rows: Vec<T>,
}
