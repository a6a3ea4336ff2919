use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use blockscope_core::error::ErrorEnvelope;
use blockscope_core::CoreError;

// ==============================================================================
// Error Type
// ==============================================================================

pub(crate) enum AppError {
    Core(CoreError),
    /// A raw RPC method outside the active whitelist.
    MethodNotAllowed(String),
    /// A body or query string the extractors could not decode.
    BadRequest(String),
    NotFound(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

pub(super) fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::InvalidInput { .. } | CoreError::BroadcastRejected { .. } => {
            StatusCode::BAD_REQUEST
        }
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::UpstreamUnavailable(_) | CoreError::Rpc(_) => StatusCode::BAD_GATEWAY,
        CoreError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Store(_)
        | CoreError::SnapshotParse { .. }
        | CoreError::Config(_)
        | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            Self::Core(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    warn!(status = status.as_u16(), error = %err, "request failed");
                }
                (status, err.envelope())
            }
            Self::MethodNotAllowed(method) => (
                StatusCode::FORBIDDEN,
                ErrorEnvelope::new("method not allowed.").echo("method", method),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorEnvelope::new(msg)),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorEnvelope::new(msg)),
        };

        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockscope_core::error::{Entity, RpcError};

    #[test]
    fn core_errors_map_to_expected_statuses() {
        let cases = [
            (CoreError::invalid("hash", "x", "bad"), StatusCode::BAD_REQUEST),
            (CoreError::not_found(Entity::Address, "x"), StatusCode::NOT_FOUND),
            (
                CoreError::BroadcastRejected {
                    code: -26,
                    reason: "min relay fee not met".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (CoreError::UpstreamUnavailable("refused".into()), StatusCode::BAD_GATEWAY),
            (
                CoreError::Rpc(RpcError::ServerError {
                    code: -28,
                    message: "Loading block index...".into(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (CoreError::NotReady, StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::Store("gone".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{err}");
        }
    }
}
