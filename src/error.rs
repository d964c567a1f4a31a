use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use actix_web::error::ResponseError;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use anyhow::Error as AnyhowError;
use log::error;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum MirrorErrors {
    #[error("{1}")]
    HttpError(u16, String)
}

/// Bridges anyhow errors out of the handlers into JSON error responses.
pub(crate) struct MirrorError {
    error: AnyhowError
}

impl Display for MirrorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.error)
    }
}

impl Debug for MirrorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.error)
    }
}

impl From<AnyhowError> for MirrorError {
    fn from(error: AnyhowError) -> Self {
        MirrorError { error }
    }
}

impl From<MirrorErrors> for MirrorError {
    fn from(error: MirrorErrors) -> Self {
        MirrorError { error: AnyhowError::new(error) }
    }
}

impl ResponseError for MirrorError {
    fn status_code(&self) -> StatusCode {
        if let Some(e) = self.error.downcast_ref::<MirrorErrors>() {
            match e {
                MirrorErrors::HttpError(status_code, _) => StatusCode::from_u16(*status_code)
            }.unwrap_or(StatusCode::IM_A_TEAPOT) // A programmer passed an invalid status code
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = if let Some(e) = self.error.downcast_ref::<MirrorErrors>() {
            match e {
                MirrorErrors::HttpError(_, message) => message.as_str()
            }
        } else {
            "Internal server error occurred"
        };

        let status_code = self.status_code();

        if status_code.is_server_error() {
            error!("Error occurred while handling route: {}", self.error.root_cause());
        }

        HttpResponse::build(status_code).json(json!({
            "error": message
        }))
    }
}

/// Fails a route with a specific http status code.
#[macro_export]
macro_rules! die {
    ($status:ident, $message:literal) => {
        return Err($crate::error::MirrorErrors::HttpError(actix_web::http::StatusCode::$status.as_u16(), $message.to_owned()).into())
    };
}
