use anyhow::Context as _;
use reel_app::error::ApiError;
use reel_dal::{Pool, query::QueryDefaults};
use reel_types::config::BackendConfig;
use serde::Serialize;
use time::{Date, macros::format_description};
use tracing::debug;

pub mod genre;
pub mod migrate;
pub mod movie;

#[allow(async_fn_in_trait)]
pub trait Executor {
    async fn run(self) -> anyhow::Result<()>;
}

pub(crate) async fn connect(backend: &BackendConfig) -> anyhow::Result<Pool> {
    let db_url = backend.database_url();
    debug!("Connecting to {db_url}");
    let pool = reel_dal::new_pool(&db_url)
        .await
        .with_context(|| format!("Cannot open database {db_url}"))?;
    Ok(pool)
}

pub(crate) fn query_defaults(backend: &BackendConfig) -> QueryDefaults {
    QueryDefaults {
        default_limit: backend.default_page_size,
        max_limit: backend.max_page_size,
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

pub(crate) fn api_error(err: ApiError) -> anyhow::Error {
    anyhow::anyhow!("{err} [{}]", err.status_code())
}

pub(crate) fn parse_date(value: &str) -> Result<Date, String> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|e| format!("Invalid date {value:?}, expected YYYY-MM-DD: {e}"))
}

pub(crate) fn parse_pair(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("Expected key=value, got {value:?}"))
}
