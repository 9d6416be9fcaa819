//! Shared primitives for the "continue on another device" handoff.
//!
//! A handoff token is a one-time credential bound to one application record
//! and one wizard step. The desktop client that minted it and the mobile
//! client that redeems it only ever agree through the authority; the types
//! here keep both sides and the authority on the same shapes and rules.

pub mod clock;
pub mod ids;
pub mod ledger;
pub mod qr;
pub mod token;
pub mod wire;

use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{ApplicationId, HandoffPair, StepId, TokenId};
pub use ledger::{check_redeemable, LedgerError, TokenLedger, DEFAULT_TOKEN_TTL};
pub use qr::QR_SIZE;
pub use token::{
    parse_continuation_url, ContinuationBase, StatusReport, TokenDescriptor, TokenRecord,
    TokenStatus,
};

/// Interval between status polls while a code is on screen.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid {kind}: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("qr encoding failed: {0}")]
    QrEncoding(String),
}
