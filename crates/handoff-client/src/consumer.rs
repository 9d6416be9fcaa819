use handoff_core::{parse_continuation_url, CoreError, HandoffPair, TokenId};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::authority::Authority;
use crate::error::AuthorityError;

/// A continuation link opened on the mobile device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationLink {
    pub pair: HandoffPair,
    pub token: TokenId,
}

impl ContinuationLink {
    pub fn parse(url: &str) -> Result<Self, CoreError> {
        let (pair, token) = parse_continuation_url(url)?;
        Ok(Self { pair, token })
    }

    /// Marks the token used. Only a successful redemption lets the mobile
    /// context continue the wizard at `self.pair.step`.
    pub async fn redeem(&self, authority: &dyn Authority) -> Result<OffsetDateTime, AuthorityError> {
        match authority.redeem(&self.token, &self.pair).await {
            Ok(redeemed_at) => {
                info!(pair = %self.pair, "continuation link redeemed");
                Ok(redeemed_at)
            }
            Err(err) => {
                warn!(pair = %self.pair, error = %err, "continuation link rejected");
                Err(err)
            }
        }
    }
}
