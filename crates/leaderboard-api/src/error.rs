//! Response envelope and error mapping for the HTTP surface.
//!
//! Every response body is a `{code, msg, data}` [`Envelope`]. `code` is
//! `0` on success and otherwise the stable [`LeaderboardError::code`];
//! the HTTP status carries the coarse failure class.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use leaderboard_core::LeaderboardError;
use serde::Serialize;

/// Status used when the caller went away before the operation finished.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Envelope code for requests the router could not decode; shared with
/// [`LeaderboardError::InvalidArgument`].
const MALFORMED_CODE: u32 = 1008;

/// The `{code, msg, data}` body returned by every route.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// `0` on success, otherwise a stable error code.
    pub code: u32,
    /// Human-readable message.
    pub msg: String,
    /// Payload on success, `null` on failure.
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    /// Wrap a successful payload.
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: 0,
            msg: String::from("ok"),
            data: Some(data),
        })
    }
}

/// Errors a handler can return.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// An engine failure.
    #[error(transparent)]
    Engine(#[from] LeaderboardError),

    /// The request body, path, or query could not be decoded.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The addressed alert does not exist.
    #[error("alert {0} not found")]
    UnknownAlert(uuid::Uuid),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Malformed(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Malformed(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Malformed(rejection.body_text())
    }
}

impl ApiError {
    /// Stable numeric code placed in the envelope.
    pub const fn code(&self) -> u32 {
        match self {
            Self::Engine(e) => e.code(),
            Self::Malformed(_) | Self::UnknownAlert(_) => MALFORMED_CODE,
        }
    }

    /// HTTP status for the failure class.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Engine(e) => match e {
                LeaderboardError::InvalidTenant(_)
                | LeaderboardError::InvalidArgument(_)
                | LeaderboardError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
                LeaderboardError::ConfigMissing(_) => StatusCode::NOT_FOUND,
                LeaderboardError::Disabled(_) => StatusCode::FORBIDDEN,
                LeaderboardError::ConfigExists(_) => StatusCode::CONFLICT,
                LeaderboardError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                LeaderboardError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                LeaderboardError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
                LeaderboardError::Cancelled => {
                    StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::REQUEST_TIMEOUT)
                }
            },
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::UnknownAlert(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), code = self.code(), error = %self, "Request failed");
        }
        let body: Envelope<()> = Envelope {
            code: self.code(),
            msg: self.to_string(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}
