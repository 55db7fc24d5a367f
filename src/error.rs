//! Error types for the invocation client.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while resolving, building, or dispatching a call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed input at a stated RFC 3986 production.
    #[error("failed to parse URI: {0}")]
    UriParse(String),

    /// `build()` was called without a scheme or host.
    #[error("failed to build URI: {0}")]
    UriBuild(String),

    /// The OpenAPI document is missing a required node or uses an
    /// unsupported value.
    #[error("failed to load OpenAPI spec: {0}")]
    SpecLoad(String),

    /// The requested method name is not part of the loaded spec.
    #[error("method '{0}' is not part of the used OpenAPI specification")]
    UnknownMethod(String),

    /// The configured server index is out of bounds.
    #[error("server index {index} is out of bounds (servers.len()={len})")]
    ServerIndexOutOfRange {
        /// Index that was requested.
        index: usize,
        /// Number of servers in the spec.
        len: usize,
    },

    /// A path template refers to a parameter that was never declared.
    #[error("could not find path parameter for name '{name}' (path: '{path}')")]
    ParameterResolution {
        /// The undeclared parameter name.
        name: String,
        /// The path template it was found in.
        path: String,
    },

    /// None of the security alternatives could be satisfied.
    #[error(
        "the provided HTTP configuration does not satisfy authentication requirements:\n{}",
        .0.iter().enumerate().map(|(i, r)| format!("  in security configuration {i}: {r}")).collect::<Vec<_>>().join("\n")
    )]
    AuthUnsatisfied(Vec<String>),

    /// The OAuth2 token endpoint returned a non-2xx status.
    #[error("OAuth2 token endpoint returned HTTP {status}")]
    AuthFetchFailed {
        /// HTTP status code returned by the token endpoint.
        status: u16,
    },

    /// The token endpoint's response body had no `access_token` field.
    #[error("OAuth2 token response is malformed: {0}")]
    MalformedTokenResponse(String),

    /// The OS keychain could not be reached within the allotted time.
    #[error("keychain unavailable: {0}")]
    KeychainUnavailable(String),

    /// The resource endpoint returned a non-200 response.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code returned by the resource endpoint.
        status: u16,
        /// Response body, if any.
        body: String,
    },

    /// The underlying HTTP transport failed outright (connection refused,
    /// DNS failure, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// Failure bubbled up from `reqwest` while building or sending a request.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Failure parsing an absolute URL with the `url` crate.
    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Failure compiling a `url` regex pattern in the settings store.
    #[error("invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// Underlying I/O failure (reading a spec or settings file from disk).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::SpecLoad(err.to_string())
    }
}

impl From<serde_yaml::Error> for ClientError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SpecLoad(err.to_string())
    }
}
