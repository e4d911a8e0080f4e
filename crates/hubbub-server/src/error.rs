//! Mapping of hub errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hubbub_core::HubError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error(transparent)]
    Hub(#[from] HubError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Hub(e) => match e {
                HubError::Validation(_)
                | HubError::HubMismatch { .. }
                | HubError::InvalidLinkHeader(_) => StatusCode::BAD_REQUEST,
                HubError::Disposed => StatusCode::SERVICE_UNAVAILABLE,
                HubError::NotSupported(_) => StatusCode::NOT_IMPLEMENTED,
                HubError::Crypto(_) | HubError::Storage(_) | HubError::Http(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::bad_request("x"), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::NotImplemented("x".into()), StatusCode::NOT_IMPLEMENTED),
            (HubError::validation("x").into(), StatusCode::BAD_REQUEST),
            (HubError::link("x").into(), StatusCode::BAD_REQUEST),
            (
                HubError::HubMismatch {
                    expected: "http://a/".into(),
                    requested: Url::parse("http://b/").unwrap(),
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (HubError::Disposed.into(), StatusCode::SERVICE_UNAVAILABLE),
            (
                HubError::Storage("x".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status(), expected, "{error:?}");
        }
    }
}
