use std::sync::Arc;

use async_trait::async_trait;
use handoff_core::{
    Clock, HandoffPair, LedgerError, StatusReport, TokenId, TokenLedger, TokenRecord,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::config::StoreBackend;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt token record {token}: {reason}")]
    Corrupt { token: String, reason: String },
}

/// Persistence for token records. Every mutating call is atomic per pair:
/// two concurrent issues for one pair never both succeed.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn can_generate(&self, pair: &HandoffPair) -> Result<bool, StoreError>;
    async fn active_token(&self, pair: &HandoffPair) -> Result<Option<TokenRecord>, StoreError>;
    async fn issue(&self, pair: &HandoffPair, replace: bool) -> Result<TokenRecord, StoreError>;
    async fn status(
        &self,
        token: &TokenId,
        pair: Option<&HandoffPair>,
    ) -> Result<StatusReport, StoreError>;
    async fn redeem(&self, token: &TokenId, pair: &HandoffPair)
        -> Result<TokenRecord, StoreError>;
    async fn reset(&self, pair: &HandoffPair) -> Result<(), StoreError>;
}

pub type StoreHandle = Arc<dyn TokenStore>;

pub struct StoreSettings<'a> {
    pub backend: StoreBackend,
    pub redis_url: Option<&'a str>,
    pub token_ttl: time::Duration,
}

pub async fn build_store(settings: StoreSettings<'_>, clock: Arc<dyn Clock>) -> StoreHandle {
    let memory = || -> StoreHandle {
        Arc::new(InMemoryTokenStore::new(
            TokenLedger::new(settings.token_ttl),
            Arc::clone(&clock),
        ))
    };
    match settings.backend {
        StoreBackend::Memory => memory(),
        StoreBackend::Redis => {
            if let Some(url) = settings.redis_url {
                match crate::store_redis::RedisTokenStore::connect(
                    url,
                    settings.token_ttl,
                    Arc::clone(&clock),
                )
                .await
                {
                    Ok(store) => return Arc::new(store),
                    Err(err) => {
                        warn!(error = %err, "failed to init redis token store; falling back to memory")
                    }
                }
            } else {
                warn!("HANDOFF_STORE=redis but REDIS_URL missing; falling back to in-memory");
            }
            memory()
        }
    }
}

/// Single-process store. Tokens are lost on restart.
pub struct InMemoryTokenStore {
    ledger: Mutex<TokenLedger>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTokenStore {
    pub fn new(ledger: TokenLedger, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            clock,
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn can_generate(&self, pair: &HandoffPair) -> Result<bool, StoreError> {
        Ok(self.ledger.lock().can_generate(pair))
    }

    async fn active_token(&self, pair: &HandoffPair) -> Result<Option<TokenRecord>, StoreError> {
        let now = self.clock.now();
        Ok(self.ledger.lock().active_token(pair, now).cloned())
    }

    async fn issue(&self, pair: &HandoffPair, replace: bool) -> Result<TokenRecord, StoreError> {
        let now = self.clock.now();
        Ok(self.ledger.lock().issue(pair, replace, now)?)
    }

    async fn status(
        &self,
        token: &TokenId,
        pair: Option<&HandoffPair>,
    ) -> Result<StatusReport, StoreError> {
        let now = self.clock.now();
        Ok(self.ledger.lock().status(token, pair, now)?)
    }

    async fn redeem(
        &self,
        token: &TokenId,
        pair: &HandoffPair,
    ) -> Result<TokenRecord, StoreError> {
        let now = self.clock.now();
        Ok(self.ledger.lock().redeem(token, pair, now)?)
    }

    async fn reset(&self, pair: &HandoffPair) -> Result<(), StoreError> {
        self.ledger.lock().reset(pair);
        Ok(())
    }
}
