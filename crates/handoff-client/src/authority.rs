use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use handoff_core::{
    Clock, ContinuationBase, HandoffPair, StatusReport, TokenDescriptor, TokenId,
    TokenLedger,
};
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::error::AuthorityError;

/// The token lifecycle authority as seen from a browser context.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn can_generate(&self, pair: &HandoffPair) -> Result<bool, AuthorityError>;

    async fn active_token(
        &self,
        pair: &HandoffPair,
    ) -> Result<Option<TokenDescriptor>, AuthorityError>;

    /// The only mutating call a desktop context makes.
    async fn create_token(
        &self,
        pair: &HandoffPair,
        replace: bool,
    ) -> Result<TokenDescriptor, AuthorityError>;

    async fn token_status(
        &self,
        token: &TokenId,
        pair: &HandoffPair,
    ) -> Result<StatusReport, AuthorityError>;

    /// Made by the mobile context when it opens a continuation link.
    async fn redeem(
        &self,
        token: &TokenId,
        pair: &HandoffPair,
    ) -> Result<OffsetDateTime, AuthorityError>;

    async fn reset(&self, pair: &HandoffPair) -> Result<(), AuthorityError>;
}

/// In-process authority for tests and early wiring. Shares the ledger rules
/// with the HTTP service.
pub struct InMemoryAuthority {
    ledger: Mutex<TokenLedger>,
    clock: Arc<dyn Clock>,
    base: ContinuationBase,
    latency: Option<Duration>,
    status_latency: Option<Duration>,
    offline: AtomicBool,
    status_polls: Mutex<HashMap<TokenId, usize>>,
}

impl InMemoryAuthority {
    pub fn new(ledger: TokenLedger, clock: Arc<dyn Clock>, base: ContinuationBase) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            clock,
            base,
            latency: None,
            status_latency: None,
            offline: AtomicBool::new(false),
            status_polls: Mutex::new(HashMap::new()),
        }
    }

    /// Every call sleeps this long first, like a network round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Extra delay on status polls only, so a poll can resolve after the
    /// session has moved to another code.
    pub fn with_status_latency(mut self, latency: Duration) -> Self {
        self.status_latency = Some(latency);
        self
    }

    /// While offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn status_polls(&self, token: &TokenId) -> usize {
        self.status_polls.lock().get(token).copied().unwrap_or(0)
    }

    pub fn issued_count(&self, pair: &HandoffPair) -> usize {
        self.ledger.lock().history(pair).len()
    }

    async fn round_trip(&self) -> Result<(), AuthorityError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(AuthorityError::Unavailable("authority offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Authority for InMemoryAuthority {
    async fn can_generate(&self, pair: &HandoffPair) -> Result<bool, AuthorityError> {
        self.round_trip().await?;
        Ok(self.ledger.lock().can_generate(pair))
    }

    async fn active_token(
        &self,
        pair: &HandoffPair,
    ) -> Result<Option<TokenDescriptor>, AuthorityError> {
        self.round_trip().await?;
        let now = self.clock.now();
        let ledger = self.ledger.lock();
        Ok(ledger
            .active_token(pair, now)
            .map(|record| self.base.describe(record)))
    }

    async fn create_token(
        &self,
        pair: &HandoffPair,
        replace: bool,
    ) -> Result<TokenDescriptor, AuthorityError> {
        self.round_trip().await?;
        let now = self.clock.now();
        let record = self.ledger.lock().issue(pair, replace, now)?;
        Ok(self.base.describe(&record))
    }

    async fn token_status(
        &self,
        token: &TokenId,
        pair: &HandoffPair,
    ) -> Result<StatusReport, AuthorityError> {
        self.round_trip().await?;
        if let Some(latency) = self.status_latency {
            tokio::time::sleep(latency).await;
        }
        *self.status_polls.lock().entry(token.clone()).or_default() += 1;
        let now = self.clock.now();
        Ok(self.ledger.lock().status(token, Some(pair), now)?)
    }

    async fn redeem(
        &self,
        token: &TokenId,
        pair: &HandoffPair,
    ) -> Result<OffsetDateTime, AuthorityError> {
        self.round_trip().await?;
        let now = self.clock.now();
        let record = self.ledger.lock().redeem(token, pair, now)?;
        Ok(record.used_at.unwrap_or(now))
    }

    async fn reset(&self, pair: &HandoffPair) -> Result<(), AuthorityError> {
        self.round_trip().await?;
        self.ledger.lock().reset(pair);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::{ManualClock, TokenStatus};

    fn authority(clock: &ManualClock) -> InMemoryAuthority {
        InMemoryAuthority::new(
            TokenLedger::default(),
            Arc::new(clock.clone()),
            ContinuationBase::parse("https://visa.example.com").unwrap(),
        )
    }

    #[tokio::test]
    async fn create_then_redeem_flips_status() {
        let clock = ManualClock::default();
        let authority = authority(&clock);
        let pair = HandoffPair::parse("A1", "visa-pg-1").unwrap();

        let descriptor = authority.create_token(&pair, false).await.unwrap();
        assert_eq!(
            descriptor.continuation_url.as_str(),
            format!("https://visa.example.com/visa-pg-1/A1?token={}", descriptor.token)
        );
        authority.redeem(&descriptor.token, &pair).await.unwrap();

        let report = authority.token_status(&descriptor.token, &pair).await.unwrap();
        assert_eq!(report.status, TokenStatus::Used);
        assert!(!authority.can_generate(&pair).await.unwrap());
        assert_eq!(authority.status_polls(&descriptor.token), 1);
    }

    #[tokio::test]
    async fn ledger_errors_map_to_distinguishable_variants() {
        let clock = ManualClock::default();
        let authority = authority(&clock);
        let pair = HandoffPair::parse("A1", "visa-pg-1").unwrap();

        let descriptor = authority.create_token(&pair, false).await.unwrap();
        assert!(matches!(
            authority.create_token(&pair, false).await,
            Err(AuthorityError::Conflict)
        ));

        let other = HandoffPair::parse("A1", "visa-pg-2").unwrap();
        assert!(matches!(
            authority.token_status(&descriptor.token, &other).await,
            Err(AuthorityError::NotFound)
        ));

        authority.redeem(&descriptor.token, &pair).await.unwrap();
        assert!(matches!(
            authority.redeem(&descriptor.token, &pair).await,
            Err(AuthorityError::AlreadyUsed)
        ));
        assert!(matches!(
            authority.create_token(&pair, true).await,
            Err(AuthorityError::Ineligible)
        ));
    }

    #[tokio::test]
    async fn offline_authority_fails_every_call() {
        let clock = ManualClock::default();
        let authority = authority(&clock);
        let pair = HandoffPair::parse("A1", "visa-pg-1").unwrap();
        authority.set_offline(true);
        assert!(matches!(
            authority.can_generate(&pair).await,
            Err(AuthorityError::Unavailable(_))
        ));
        assert_eq!(authority.issued_count(&pair), 0);
    }
}
