//! A typed client for the HTTP API, holding one user's session.

use thiserror::Error;

mod api;
mod session;

pub use api::ApiClient;
pub use session::{token_expiry, Session};

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Failures seen by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The server answered with an error body.
    #[error("{message} ({status})")]
    Api { status: u16, message: String },
    #[error("Not logged in")]
    LoggedOut,
    #[error("Malformed access token: {0}")]
    MalformedToken(#[from] jsonwebtoken::errors::Error),
}
