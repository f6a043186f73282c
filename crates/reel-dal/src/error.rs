pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Record conflicts with existing one: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Referenced record does not exist: {0}")]
    InvalidReference(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid order by field: {0}")]
    InvalidOrderByField(String),

    #[error("Invalid filter field: {0}")]
    InvalidFilterField(String),

    #[error("Invalid selected field: {0}")]
    InvalidSelectField(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl Error {
    /// Maps unique index violations to [`Error::Conflict`] and foreign key
    /// violations to [`Error::InvalidReference`], other errors pass as they are.
    pub(crate) fn from_write(err: sqlx::Error, entity: &str) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                tracing::debug!("Unique violation on {entity}: {db_err}");
                Error::Conflict(entity.to_string())
            }
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                tracing::debug!("Foreign key violation on {entity}: {db_err}");
                Error::InvalidReference(entity.to_string())
            }
            other => Error::DatabaseError(other),
        }
    }
}
