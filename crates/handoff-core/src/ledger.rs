//! Token lifecycle rules shared by every authority backend.
//!
//! The ledger is synchronous and takes `now` explicitly; callers own
//! locking and the clock.

use std::collections::HashMap;

use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::{HandoffPair, StatusReport, TokenId, TokenRecord};

pub const DEFAULT_TOKEN_TTL: Duration = Duration::minutes(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("handoff for {0} was already used")]
    Ineligible(HandoffPair),
    #[error("an active token already exists for {}", .active.pair)]
    Conflict { active: Box<TokenRecord> },
    #[error("token not found")]
    NotFound,
    #[error("token does not belong to {0}")]
    PairMismatch(HandoffPair),
    #[error("token was already used")]
    AlreadyUsed,
    #[error("token has expired")]
    Expired,
}

#[derive(Debug, Clone, Default)]
struct PairState {
    latest: Option<TokenId>,
    exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct TokenLedger {
    ttl: Duration,
    tokens: HashMap<TokenId, TokenRecord>,
    pairs: HashMap<HandoffPair, PairState>,
}

impl Default for TokenLedger {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl TokenLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: HashMap::new(),
            pairs: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A pair may mint new tokens until one of them is redeemed.
    pub fn can_generate(&self, pair: &HandoffPair) -> bool {
        self.pairs
            .get(pair)
            .map(|state| !state.exhausted)
            .unwrap_or(true)
    }

    pub fn active_token(&self, pair: &HandoffPair, now: OffsetDateTime) -> Option<&TokenRecord> {
        let latest = self.pairs.get(pair)?.latest.as_ref()?;
        self.tokens
            .get(latest)
            .filter(|record| record.is_active_at(now))
    }

    /// Issues a token for `pair`. With `replace` set, a still-active token is
    /// superseded instead of reported as a conflict.
    pub fn issue(
        &mut self,
        pair: &HandoffPair,
        replace: bool,
        now: OffsetDateTime,
    ) -> Result<TokenRecord, LedgerError> {
        if !self.can_generate(pair) {
            return Err(LedgerError::Ineligible(pair.clone()));
        }

        let record = TokenRecord::issue(pair.clone(), now, self.ttl);

        if let Some(active) = self.active_token(pair, now) {
            if !replace {
                return Err(LedgerError::Conflict {
                    active: Box::new(active.clone()),
                });
            }
            let previous = active.token.clone();
            if let Some(previous) = self.tokens.get_mut(&previous) {
                previous.superseded_by = Some(record.token.clone());
            }
        }

        self.pairs.entry(pair.clone()).or_default().latest = Some(record.token.clone());
        self.tokens.insert(record.token.clone(), record.clone());
        Ok(record)
    }

    /// Status poll. When `pair` is supplied the token must belong to it.
    pub fn status(
        &self,
        token: &TokenId,
        pair: Option<&HandoffPair>,
        now: OffsetDateTime,
    ) -> Result<StatusReport, LedgerError> {
        let record = self.tokens.get(token).ok_or(LedgerError::NotFound)?;
        if let Some(pair) = pair {
            if &record.pair != pair {
                return Err(LedgerError::PairMismatch(pair.clone()));
            }
        }
        Ok(record.report_at(now))
    }

    /// The redemption event: flips `active -> used` once and exhausts the pair.
    pub fn redeem(
        &mut self,
        token: &TokenId,
        pair: &HandoffPair,
        now: OffsetDateTime,
    ) -> Result<TokenRecord, LedgerError> {
        let record = self.tokens.get_mut(token).ok_or(LedgerError::NotFound)?;
        if &record.pair != pair {
            return Err(LedgerError::PairMismatch(pair.clone()));
        }
        check_redeemable(record, now)?;
        record.used_at = Some(now);
        let redeemed = record.clone();
        self.pairs.entry(pair.clone()).or_default().exhausted = true;
        Ok(redeemed)
    }

    /// Lifts the used-blocks-generation rule for `pair`. Token records stay.
    pub fn reset(&mut self, pair: &HandoffPair) {
        if let Some(state) = self.pairs.get_mut(pair) {
            state.exhausted = false;
        }
    }

    /// Every record ever issued for `pair`, oldest first.
    pub fn history(&self, pair: &HandoffPair) -> Vec<&TokenRecord> {
        let mut records: Vec<&TokenRecord> = self
            .tokens
            .values()
            .filter(|record| &record.pair == pair)
            .collect();
        records.sort_by_key(|record| record.issued_at);
        records
    }
}

/// Shared by every backend so redemption outcomes stay identical.
pub fn check_redeemable(record: &TokenRecord, now: OffsetDateTime) -> Result<(), LedgerError> {
    match record.status_at(now) {
        crate::TokenStatus::Active => Ok(()),
        crate::TokenStatus::Used => Err(LedgerError::AlreadyUsed),
        crate::TokenStatus::Expired => Err(LedgerError::Expired),
    }
}
