use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure-level failures. Expected, user-facing refusals (denial
/// reasons) are returned as values, not errors; see
/// [`crate::model::eligibility::DenialReason`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::Status(Status::NotFound, format!("{} not found", what))
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    /// Full detail goes to the server log; the response carries only a
    /// status code, never raw driver error text.
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let status = match &self {
            Self::Db(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Status(status, _) => *status,
        };
        if status == Status::InternalServerError {
            error!("Internal error: {:?}", self);
        } else {
            warn!("Request refused ({}): {}", status, self);
        }
        Err(status)
    }
}
