//! Browser-side half of the QR handoff.
//!
//! [`HandoffSession`] drives the desktop flow for one application step:
//! eligibility check, resuming or generating a code, polling its status and
//! stopping when it is scanned, expires or is hidden. [`ContinuationLink`] is
//! the mobile side that redeems the scanned link. Both talk to the token
//! authority through the [`Authority`] trait, implemented over HTTP by
//! [`HttpAuthority`] and in-process by [`InMemoryAuthority`].

pub mod authority;
pub mod config;
pub mod consumer;
pub mod error;
pub mod http;
pub mod session;
pub mod view;

pub use authority::{Authority, InMemoryAuthority};
pub use config::HandoffConfig;
pub use consumer::ContinuationLink;
pub use error::{AuthorityError, HandoffError};
pub use http::HttpAuthority;
pub use session::{HandoffSession, HandoffSnapshot, HandoffState};
pub use view::{ControlView, Notice, NoticeKind, USED_MESSAGE};
