use thiserror::Error;

use crate::models::ProtocolException;

/// Application-wide error types.
///
/// This enum represents every failure the harvester can observe, from the
/// transport layer up to the harvesting session. It uses the `thiserror` crate
/// for ergonomic error handling and automatic conversion from underlying
/// library errors.
///
/// # Fatality
///
/// Only a subset of these errors end a harvesting session:
/// - [`AppError::CountError`] and configuration errors fail the session before
///   any page is fetched.
/// - [`AppError::ProtocolViolation`] and [`AppError::ActivityTimeout`] abort a
///   running session.
/// - [`AppError::FetchPage`] is always recovered locally and only shows up in
///   `pageError` events.
///
/// # Examples
///
/// ```
/// use csw_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::RecordNotFound("urn:example:1".to_string()))
/// }
/// assert!(example().is_err());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Network or connection error.
    ///
    /// The request never produced an HTTP response: DNS failure, refused
    /// connection, reset stream, or a body that could not be read.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Transport-level request timeout.
    ///
    /// Distinct from [`AppError::ActivityTimeout`], which is enforced by the
    /// harvesting session across all requests.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The server answered with a status code >= 400.
    #[error("Responded with an error status code: {status} ({url})")]
    HttpStatus { status: u16, url: String },

    /// The response was not an XML document (missing or foreign content type).
    #[error("Not an XML response: {0}")]
    ResponseFormat(String),

    /// The server returned an OWS `ExceptionReport` instead of a result.
    #[error("Protocol exception: {0}")]
    ProtocolException(ProtocolException),

    /// Too many redirects were followed while resolving the service URL.
    #[error("Too many redirections ({hops} already followed), refusing to follow {location}")]
    RedirectLoop { hops: usize, location: String },

    /// The `hits` request did not yield a usable record count.
    #[error("Invalid count result: {0}")]
    CountError(String),

    /// A single page could not be fetched. Never fatal for a session.
    #[error("Error in fetch operation at position {start_position}: {source}")]
    FetchPage {
        start_position: u64,
        #[source]
        source: Box<AppError>,
    },

    /// A page returned more records than requested.
    #[error(
        "Protocol violation at position {start_position}: expected at most {expected} records, got {returned}"
    )]
    ProtocolViolation {
        start_position: u64,
        expected: u64,
        returned: u64,
    },

    /// No network operation completed within the activity window.
    #[error("Harvesting timeout: no activity for {0} ms")]
    ActivityTimeout(u64),

    /// A compatibility option outside the known vocabulary was requested.
    #[error("Unknown compatibility option: {0}")]
    UnknownCompatOption(String),

    /// The parsed response was of another kind than the operation expects.
    #[error("Not acceptable response type: {actual} (expected {expected})")]
    UnexpectedResponse {
        expected: &'static str,
        actual: String,
    },

    /// `GetRecordById` answered without any record.
    #[error("No record returned for id: {0}")]
    RecordNotFound(String),

    /// The response body could not be parsed as a protocol document.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration value or file is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing a local file failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection and the service URL.", msg)
            }
            AppError::Timeout(secs) => {
                format!("Request timed out after {} seconds.\n   The catalog may be overloaded. Try again later.", secs)
            }
            AppError::HttpStatus { status, url } if *status == 404 => {
                format!("Service not found at {}.\n   Check the CSW endpoint URL.", url)
            }
            AppError::ResponseFormat(_) => {
                "The server did not answer with XML.\n   Is this really a CSW endpoint?".to_string()
            }
            AppError::RedirectLoop { hops, .. } => {
                format!("The service URL redirected {} times.\n   Use the final URL directly.", hops)
            }
            AppError::ActivityTimeout(ms) => {
                format!("No response from the catalog for {} ms.\n   Try a larger --timeout or a lower --concurrency.", ms)
            }
            AppError::UnknownCompatOption(name) => {
                format!(
                    "Unknown compatibility option: {}\n   Valid options: define-constraint-language, define-namespace, no-encode-qs, progressive-element-set-name",
                    name
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use csw_core::error::AppError;
    ///
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::UnknownCompatOption("foo".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            AppError::FetchPage { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<ProtocolException> for AppError {
    fn from(exception: ProtocolException) -> Self {
        AppError::ProtocolException(exception)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}
