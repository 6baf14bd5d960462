use http::StatusCode;
use spin_sdk::http::Response;
use thiserror::Error;
use tracing::error;

/// Failures raised by a `KvStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("stored document is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Every error an API operation can report, with the HTTP status it maps to.
///
/// Some rule violations keep the status the public API has always used for
/// them (a taken username is a 400, a redundant follow is a 403, touching
/// somebody else's post or comment on delete is a 401).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Username is already in use")]
    DuplicateUsername,

    #[error("Password is not correct")]
    InvalidCredential,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotOwner(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("You cannot {action} yourself")]
    SelfFollowForbidden { action: &'static str },

    #[error("You already follow this user")]
    AlreadyFollowing,

    #[error("You do not follow this user")]
    NotFollowing,

    #[error("{0}")]
    NotFound(String),

    #[error("Internal Error: {0}")]
    InternalError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;
pub type HandlerResult = ApiResult<Response>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::DuplicateUsername | ApiError::InvalidCredential => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized | ApiError::NotOwner(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_)
            | ApiError::SelfFollowForbidden { .. }
            | ApiError::AlreadyFollowing
            | ApiError::NotFollowing => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{} not found", what))
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        let message = match &err {
            ApiError::InternalError(detail) => {
                error!(%detail, "request failed");
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };
        Response::builder()
            .status(err.status().as_u16())
            .header("Content-Type", "application/json")
            .body(serde_json::json!({ "error": message }).to_string())
            .build()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}
