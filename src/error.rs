use crate::{auth::AuthError, ffmpeg::ConversionError, util::DownloadError};

/// Everything that can end the processing of a single reference.
///
/// Only [`Error::Auth`] is fatal for a whole run, and only when it is raised
/// while logging in with credentials the user supplied.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid link or id '{0}'")]
    InvalidReference(String),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("could not find video format '{0}', to view all available formats use --list-formats")]
    FormatNotFound(String),
    #[error("temporary failure: {0}")]
    Transient(String),
    #[error("unexpected API response: {0}")]
    Api(String),
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),
}

impl Error {
    /// Maps a non-success HTTP status from the site API onto the taxonomy.
    pub fn from_status(status: reqwest::StatusCode, what: &str) -> Self {
        use reqwest::StatusCode;

        match status {
            StatusCode::NOT_FOUND => Error::NotFound(what.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::AccessDenied(format!("{} (status code {})", what, status.as_u16()))
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                Error::Transient(format!("{} (status code {})", what, s.as_u16()))
            }
            s => Error::Api(format!("{} (status code {})", what, s.as_u16())),
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(e: reqwest_middleware::Error) -> Self {
        Error::Transient(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Api(e.to_string())
        } else {
            Error::Transient(e.to_string())
        }
    }
}
