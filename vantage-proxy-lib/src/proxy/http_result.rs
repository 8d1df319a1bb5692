//! Per-request error taxonomy (spec §7), extending the teacher's
//! `proxy/http_result.rs::HttpError` with the failure modes the new
//! pipeline introduces: access denial, rate limiting, oversized payloads,
//! and upgrade failures.

use http::StatusCode;
use thiserror::Error;

pub(crate) type HttpResult<T> = std::result::Result<T, HttpError>;

#[derive(Debug, Error, Clone)]
pub enum HttpError {
    #[error("invalid host in request header")]
    InvalidHostInRequestHeader,

    #[error("no matching rule for listener")]
    NoMatchingRule,

    #[error("no matching route")]
    NoMatchingRoute,

    #[error("access denied: {0}")]
    AccessDenied(&'static str),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("payload too large: {0}")]
    PayloadTooLarge(crate::transform::body::PayloadTooLarge),

    #[error("no upstream candidates")]
    NoUpstreamCandidates,

    #[error("failed to generate upstream request: {0}")]
    FailedToGenerateUpstreamRequest(String),

    #[error("failed to get response from backend: {0}")]
    FailedToGetResponseFromBackend(String),

    #[error("failed to generate downstream response: {0}")]
    FailedToGenerateDownstreamResponse(String),

    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("too many redirects")]
    TooManyRedirects,
}

impl From<HttpError> for StatusCode {
    fn from(e: HttpError) -> StatusCode {
        match e {
            HttpError::InvalidHostInRequestHeader => StatusCode::BAD_REQUEST,
            HttpError::NoMatchingRule | HttpError::NoMatchingRoute => StatusCode::NOT_FOUND,
            HttpError::AccessDenied(_) => StatusCode::FORBIDDEN,
            HttpError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            HttpError::Unauthorized => StatusCode::UNAUTHORIZED,
            HttpError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            HttpError::NoUpstreamCandidates => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::FailedToGenerateUpstreamRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::FailedToGetResponseFromBackend(_) => StatusCode::BAD_GATEWAY,
            HttpError::FailedToGenerateDownstreamResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::InvalidUri(_) => StatusCode::BAD_REQUEST,
            HttpError::TooManyRedirects => StatusCode::BAD_GATEWAY,
        }
    }
}
