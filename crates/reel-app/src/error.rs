use http::StatusCode;
use tracing::error;

pub type ApiResult<T, E = ApiError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid payload: {0}")]
    Validation(#[from] garde::Report),

    #[error("Data layer error: {0}")]
    Dal(reel_dal::Error),
}

impl From<reel_dal::Error> for ApiError {
    fn from(value: reel_dal::Error) -> Self {
        use reel_dal::Error;
        match value {
            Error::InvalidOrderByField(_)
            | Error::InvalidFilterField(_)
            | Error::InvalidSelectField(_)
            | Error::InvalidQuery(_) => ApiError::InvalidQuery(value.to_string()),
            Error::InvalidReference(_) | Error::InvalidValue(_) => {
                ApiError::BadRequest(value.to_string())
            }
            Error::RecordNotFound(what) => ApiError::NotFound(what),
            other => ApiError::Dal(other),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Dal(reel_dal::Error::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Dal(e) => {
                error!("Unhandled data layer error: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
