use handoff_core::{CoreError, LedgerError};
use thiserror::Error;

/// Failures reported by (or while talking to) the token authority.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("handoff for this page was already used")]
    Ineligible,
    #[error("an active token already exists for this page")]
    Conflict,
    #[error("token not found")]
    NotFound,
    #[error("token was already used")]
    AlreadyUsed,
    #[error("token has expired")]
    Expired,
    #[error("authority unavailable: {0}")]
    Unavailable(String),
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] CoreError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl From<LedgerError> for AuthorityError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Ineligible(_) => AuthorityError::Ineligible,
            LedgerError::Conflict { .. } => AuthorityError::Conflict,
            LedgerError::NotFound | LedgerError::PairMismatch(_) => AuthorityError::NotFound,
            LedgerError::AlreadyUsed => AuthorityError::AlreadyUsed,
            LedgerError::Expired => AuthorityError::Expired,
        }
    }
}

/// Why a generate request did not produce a displayed code.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("a generate request is already in flight")]
    InFlight,
    #[error("a code is already displayed for this page")]
    AlreadyActive,
    #[error("QR code for this page has already been used")]
    EligibilityDenied,
    #[error("another device holds an active code for this page")]
    Conflict,
    #[error(transparent)]
    Authority(#[from] AuthorityError),
}
