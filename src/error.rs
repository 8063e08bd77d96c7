use argon2::Error as Argon2Error;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::mongodb::is_duplicate_key;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while handling a request.
///
/// The first five variants are the client-facing kinds; the rest wrap
/// internal failures and surface as a 500 unless noted otherwise.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error("Field cipher failure: {0}")]
    Cipher(String),
    #[error("Failed to send email: {0}")]
    Mail(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    /// Map a duplicate-key write error to a conflict with the given message,
    /// passing every other error through untouched.
    pub fn conflict_on_duplicate(err: DbError, message: impl Into<String>) -> Self {
        if is_duplicate_key(&err) {
            Self::Conflict(message.into())
        } else {
            Self::Db(err)
        }
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Validation(_) => Status::BadRequest,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Forbidden(_) => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::Conflict(_) => Status::Conflict,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::Forbidden,
            },
            Self::Db(_) | Self::Argon2(_) | Self::Cipher(_) | Self::Mail(_) | Self::Io(_) => {
                Status::InternalServerError
            }
        }
    }
}

/// JSON error body shared by handlers and catchers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let message = match (&self, status.class()) {
            (_, StatusClass::ServerError) => {
                error!("{} {}: {self}", req.method(), req.uri());
                "Server error".to_string()
            }
            (Self::Jwt(err), _) => match err.kind() {
                JwtErrorKind::ExpiredSignature => "Token expired".to_string(),
                _ => "Invalid token".to_string(),
            },
            _ => {
                debug!("{} {} rejected: {self}", req.method(), req.uri());
                self.to_string()
            }
        };
        (status, Json(ErrorBody::new(message))).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_kinds_map_to_their_status() {
        assert_eq!(Error::Validation("x".into()).status(), Status::BadRequest);
        assert_eq!(Error::Unauthorized("x".into()).status(), Status::Unauthorized);
        assert_eq!(Error::Forbidden("x".into()).status(), Status::Forbidden);
        assert_eq!(Error::not_found("Nomination").status(), Status::NotFound);
        assert_eq!(Error::Conflict("x".into()).status(), Status::Conflict);
        assert_eq!(
            Error::Cipher("bad".into()).status(),
            Status::InternalServerError
        );
    }

    #[test]
    fn jwt_expiry_is_unauthorized_other_jwt_errors_forbidden() {
        let expired: Error = JwtError::from(JwtErrorKind::ExpiredSignature).into();
        assert_eq!(expired.status(), Status::Unauthorized);

        let invalid: Error = JwtError::from(JwtErrorKind::InvalidSignature).into();
        assert_eq!(invalid.status(), Status::Forbidden);
    }

    #[test]
    fn not_found_message_names_the_resource() {
        assert_eq!(
            Error::not_found("Nomination").to_string(),
            "Nomination not found"
        );
    }
}
