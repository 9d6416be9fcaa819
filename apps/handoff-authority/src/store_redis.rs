use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use handoff_core::{
    Clock, HandoffPair, LedgerError, StatusReport, TokenId, TokenRecord,
};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use time::OffsetDateTime;

use crate::store::{StoreError, TokenStore};

const TOKEN_PREFIX: &str = "handoff:token:";

// KEYS: exhausted flag, latest pointer, new token hash
// ARGV: replace, now_ms, token, application_id, step, issued_ms, expires_ms,
//       token key prefix
// Nothing written here carries a TTL; records and the exhausted flag live
// until an explicit reset.
static ISSUE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return {'ineligible'}
end
local latest = redis.call('GET', KEYS[2])
if latest then
  local key = ARGV[8] .. latest
  local f = redis.call('HMGET', key, 'used_at', 'superseded_by', 'expires_at')
  if f[3] and not f[1] and not f[2] and tonumber(f[3]) >= tonumber(ARGV[2]) then
    if ARGV[1] ~= '1' then
      return {'conflict', latest}
    end
    redis.call('HSET', key, 'superseded_by', ARGV[3])
  end
end
redis.call('HSET', KEYS[3], 'application_id', ARGV[4], 'step', ARGV[5],
  'issued_at', ARGV[6], 'expires_at', ARGV[7])
redis.call('SET', KEYS[2], ARGV[3])
return {'ok'}
"#,
    )
});

// KEYS: token hash, exhausted flag
// ARGV: application_id, step, now_ms
static REDEEM: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local f = redis.call('HMGET', KEYS[1], 'application_id', 'step', 'expires_at', 'used_at', 'superseded_by')
if not f[1] then
  return {'not_found'}
end
if f[1] ~= ARGV[1] or f[2] ~= ARGV[2] then
  return {'mismatch'}
end
if f[4] then
  return {'used'}
end
if f[5] or tonumber(f[3]) < tonumber(ARGV[3]) then
  return {'expired'}
end
redis.call('HSET', KEYS[1], 'used_at', ARGV[3])
redis.call('SET', KEYS[2], '1')
return {'ok'}
"#,
    )
});

/// Token store shared by every authority replica. Issue and redeem run as
/// Lua scripts so their check-then-write is atomic.
pub struct RedisTokenStore {
    conn: ConnectionManager,
    ttl: time::Duration,
    clock: Arc<dyn Clock>,
}

impl RedisTokenStore {
    pub async fn connect(
        url: &str,
        ttl: time::Duration,
        clock: Arc<dyn Clock>,
    ) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, ttl, clock })
    }

    fn now(&self) -> OffsetDateTime {
        from_millis(to_millis(self.clock.now()))
    }

    async fn load(&self, token: &TokenId) -> Result<Option<TokenRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(token_key(token)).await?;
        record_from_hash(token, &fields)
    }
}

fn token_key(token: &TokenId) -> String {
    format!("{TOKEN_PREFIX}{token}")
}

fn pair_key(pair: &HandoffPair, suffix: &str) -> String {
    format!(
        "handoff:pair:{}:{}:{}",
        pair.application_id, pair.step, suffix
    )
}

fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn record_from_hash(
    token: &TokenId,
    fields: &HashMap<String, String>,
) -> Result<Option<TokenRecord>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let corrupt = |reason: &str| StoreError::Corrupt {
        token: token.to_string(),
        reason: reason.to_string(),
    };
    let field = |name: &'static str| {
        fields
            .get(name)
            .ok_or_else(|| corrupt(&format!("missing {name}")))
    };
    let millis = |raw: &String| {
        raw.parse::<i64>()
            .map(from_millis)
            .map_err(|err| corrupt(&err.to_string()))
    };

    let pair = HandoffPair::parse(field("application_id")?, field("step")?)
        .map_err(|err| corrupt(&err.to_string()))?;
    Ok(Some(TokenRecord {
        token: token.clone(),
        pair,
        issued_at: millis(field("issued_at")?)?,
        expires_at: millis(field("expires_at")?)?,
        used_at: fields.get("used_at").map(millis).transpose()?,
        superseded_by: fields.get("superseded_by").map(|t| TokenId::from(t.as_str())),
    }))
}

fn unexpected(reply: &[String]) -> StoreError {
    StoreError::Redis(redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "unexpected script reply",
        reply.join(","),
    )))
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn can_generate(&self, pair: &HandoffPair) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exhausted: bool = conn.exists(pair_key(pair, "exhausted")).await?;
        Ok(!exhausted)
    }

    async fn active_token(&self, pair: &HandoffPair) -> Result<Option<TokenRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let latest: Option<String> = conn.get(pair_key(pair, "latest")).await?;
        let Some(latest) = latest else {
            return Ok(None);
        };
        let now = self.now();
        Ok(self
            .load(&TokenId::from(latest))
            .await?
            .filter(|record| record.is_active_at(now)))
    }

    async fn issue(&self, pair: &HandoffPair, replace: bool) -> Result<TokenRecord, StoreError> {
        let now = self.now();
        let record = TokenRecord::issue(pair.clone(), now, self.ttl);
        let mut conn = self.conn.clone();
        let reply: Vec<String> = ISSUE
            .key(pair_key(pair, "exhausted"))
            .key(pair_key(pair, "latest"))
            .key(token_key(&record.token))
            .arg(if replace { "1" } else { "0" })
            .arg(to_millis(now))
            .arg(record.token.as_str())
            .arg(pair.application_id.as_str())
            .arg(pair.step.as_str())
            .arg(to_millis(record.issued_at))
            .arg(to_millis(record.expires_at))
            .arg(TOKEN_PREFIX)
            .invoke_async(&mut conn)
            .await?;

        match reply.first().map(String::as_str) {
            Some("ok") => Ok(record),
            Some("ineligible") => Err(LedgerError::Ineligible(pair.clone()).into()),
            Some("conflict") => {
                let active = match reply.get(1) {
                    Some(latest) => self.load(&TokenId::from(latest.as_str())).await?,
                    None => None,
                };
                let active = active.ok_or_else(|| unexpected(&reply))?;
                Err(LedgerError::Conflict {
                    active: Box::new(active),
                }
                .into())
            }
            _ => Err(unexpected(&reply)),
        }
    }

    async fn status(
        &self,
        token: &TokenId,
        pair: Option<&HandoffPair>,
    ) -> Result<StatusReport, StoreError> {
        let record = self.load(token).await?.ok_or(LedgerError::NotFound)?;
        if let Some(pair) = pair {
            if &record.pair != pair {
                return Err(LedgerError::PairMismatch(pair.clone()).into());
            }
        }
        Ok(record.report_at(self.now()))
    }

    async fn redeem(
        &self,
        token: &TokenId,
        pair: &HandoffPair,
    ) -> Result<TokenRecord, StoreError> {
        let now = self.now();
        let mut conn = self.conn.clone();
        let reply: Vec<String> = REDEEM
            .key(token_key(token))
            .key(pair_key(pair, "exhausted"))
            .arg(pair.application_id.as_str())
            .arg(pair.step.as_str())
            .arg(to_millis(now))
            .invoke_async(&mut conn)
            .await?;

        match reply.first().map(String::as_str) {
            Some("ok") => self
                .load(token)
                .await?
                .ok_or_else(|| LedgerError::NotFound.into()),
            Some("not_found") => Err(LedgerError::NotFound.into()),
            Some("mismatch") => Err(LedgerError::PairMismatch(pair.clone()).into()),
            Some("used") => Err(LedgerError::AlreadyUsed.into()),
            Some("expired") => Err(LedgerError::Expired.into()),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn reset(&self, pair: &HandoffPair) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(pair_key(pair, "exhausted")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::{ManualClock, TokenStatus};

    #[test]
    fn hash_round_trips_through_record() {
        let token = TokenId::from("tok");
        let issued = from_millis(1_700_000_000_123);
        let fields = HashMap::from([
            ("application_id".to_string(), "A1".to_string()),
            ("step".to_string(), "visa-pg-1".to_string()),
            ("issued_at".to_string(), "1700000000123".to_string()),
            ("expires_at".to_string(), "1700000300123".to_string()),
            ("used_at".to_string(), "1700000010000".to_string()),
        ]);
        let record = record_from_hash(&token, &fields).unwrap().unwrap();
        assert_eq!(record.issued_at, issued);
        assert_eq!(record.expires_at, issued + time::Duration::minutes(5));
        assert_eq!(record.status_at(issued), TokenStatus::Used);
        assert!(record_from_hash(&token, &HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn missing_field_is_corrupt() {
        let fields = HashMap::from([("application_id".to_string(), "A1".to_string())]);
        assert!(matches!(
            record_from_hash(&TokenId::from("tok"), &fields),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn redis_store_enforces_single_use() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let clock = ManualClock::default();
        let store = RedisTokenStore::connect(
            &url,
            time::Duration::minutes(5),
            Arc::new(clock.clone()),
        )
        .await
        .expect("redis");
        let pair = HandoffPair::parse(&format!("it-{}", to_millis(clock.now())), "visa-pg-1")
            .unwrap();

        let record = store.issue(&pair, false).await.unwrap();
        assert!(matches!(
            store.issue(&pair, false).await,
            Err(StoreError::Ledger(LedgerError::Conflict { .. }))
        ));
        store.redeem(&record.token, &pair).await.unwrap();
        assert!(matches!(
            store.redeem(&record.token, &pair).await,
            Err(StoreError::Ledger(LedgerError::AlreadyUsed))
        ));
        assert!(!store.can_generate(&pair).await.unwrap());

        store.reset(&pair).await.unwrap();
        assert!(store.can_generate(&pair).await.unwrap());
        let report = store.status(&record.token, Some(&pair)).await.unwrap();
        assert_eq!(report.status, TokenStatus::Used);
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn redis_keys_never_expire() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let clock = ManualClock::default();
        let store = RedisTokenStore::connect(
            &url,
            time::Duration::minutes(5),
            Arc::new(clock.clone()),
        )
        .await
        .expect("redis");
        let pair = HandoffPair::parse(&format!("ttl-{}", to_millis(clock.now())), "visa-pg-2")
            .unwrap();

        let record = store.issue(&pair, false).await.unwrap();
        store.redeem(&record.token, &pair).await.unwrap();

        let mut conn = store.conn.clone();
        for key in [
            pair_key(&pair, "exhausted"),
            pair_key(&pair, "latest"),
            token_key(&record.token),
        ] {
            let ttl: i64 = redis::cmd("TTL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .unwrap();
            assert_eq!(ttl, -1, "{key} has a ttl");
        }

        // A year later the pair is still blocked.
        clock.advance(time::Duration::days(365));
        assert!(!store.can_generate(&pair).await.unwrap());
        assert!(matches!(
            store.issue(&pair, false).await,
            Err(StoreError::Ledger(LedgerError::Ineligible(_)))
        ));
    }
}
