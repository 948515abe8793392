//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between the API, the archive writer and
/// the preference store.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure, including the 30 s request timeout.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success HTTP status.
    #[error("api returned status {status}: {message}")]
    Api { status: u16, message: String },

    /// The GraphQL layer reported errors in an otherwise valid response.
    #[error("graphql: {0}")]
    Graphql(String),

    /// The response parsed as JSON but not into the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A query or download was attempted without any station scope.
    #[error("no station selected")]
    NoStationSelected,

    #[error("configuration: {0}")]
    Config(String),

    #[error("preference store: {0}")]
    Store(String),

    #[error("archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
