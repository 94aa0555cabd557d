use http::StatusCode;
use thiserror::Error;

/// HTTP result type, T is typically a hyper::Response
/// HttpError is used to generate a synthetic error response
pub type HttpResult<T> = std::result::Result<T, HttpError>;

/// Describes things that can go wrong on the request path
#[derive(Debug, Error, Clone)]
pub enum HttpError {
    #[error("No route matches the request host")]
    NoMatchingRoute,

    #[error("No live backend for the selected route")]
    NoBackend,

    #[error("Failed to dial backend for upgrade: {0}")]
    UpstreamDial(String),

    #[error("Failed to send request to backend: {0}")]
    Upstream(String),

    #[error("Failed to read response from backend: {0}")]
    BadGateway(String),

    #[error("Failed to take over the client connection: {0}")]
    Hijack(String),
}

impl From<HttpError> for StatusCode {
    fn from(e: HttpError) -> StatusCode {
        match e {
            HttpError::NoMatchingRoute => StatusCode::NOT_FOUND,
            HttpError::NoBackend => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::UpstreamDial(_) => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            HttpError::Hijack(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl HttpError {
    /// Returns a string identifier for the error type, useful for logging
    pub fn error_type(&self) -> &'static str {
        match self {
            HttpError::NoMatchingRoute => "no_matching_route",
            HttpError::NoBackend => "no_backend",
            HttpError::UpstreamDial(_) => "upstream_dial_failed",
            HttpError::Upstream(_) => "backend_error",
            HttpError::BadGateway(_) => "bad_gateway",
            HttpError::Hijack(_) => "hijack_failed",
        }
    }
}
