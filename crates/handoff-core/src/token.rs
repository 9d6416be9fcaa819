use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use url::Url;

use crate::{ApplicationId, CoreError, HandoffPair, StepId, TokenId};

/// Status as reported by the authority. `dismissed` is a client-only notion
/// and never appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Used,
    Expired,
}

impl TokenStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TokenStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Used => "used",
            TokenStatus::Expired => "expired",
        }
    }
}

/// Authority-side record of one issued token. Records are superseded or
/// consumed, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: TokenId,
    pub pair: HandoffPair,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub used_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub superseded_by: Option<TokenId>,
}

impl TokenRecord {
    /// Builds a fresh record for `pair` that lives for `ttl` from `now`.
    pub fn issue(pair: HandoffPair, now: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            token: TokenId::generate(),
            pair,
            issued_at: now,
            expires_at: now + ttl,
            used_at: None,
            superseded_by: None,
        }
    }

    /// Effective status at `now`. Redemption wins over expiry, and a
    /// superseded token is treated as expired.
    pub fn status_at(&self, now: OffsetDateTime) -> TokenStatus {
        if self.used_at.is_some() {
            TokenStatus::Used
        } else if self.superseded_by.is_some() || now > self.expires_at {
            TokenStatus::Expired
        } else {
            TokenStatus::Active
        }
    }

    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.status_at(now) == TokenStatus::Active
    }

    pub fn report_at(&self, now: OffsetDateTime) -> StatusReport {
        let status = self.status_at(now);
        StatusReport {
            status,
            valid: status == TokenStatus::Active,
            expires_at: self.expires_at,
        }
    }
}

/// Answer to a status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: TokenStatus,
    pub valid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// What a client needs to render a shareable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDescriptor {
    pub token: TokenId,
    pub pair: HandoffPair,
    pub expires_at: OffsetDateTime,
    pub continuation_url: Url,
}

/// Public origin of the wizard frontend; continuation links hang off it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationBase {
    origin: Url,
}

impl ContinuationBase {
    pub fn parse(origin: &str) -> Result<Self, CoreError> {
        let origin = Url::parse(origin.trim())
            .map_err(|err| CoreError::InvalidUrl(format!("{origin}: {err}")))?;
        if origin.cannot_be_a_base() {
            return Err(CoreError::InvalidUrl(format!(
                "{origin}: cannot be used as a base"
            )));
        }
        Ok(Self { origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// `{origin}/{step}/{application_id}?token={token}`
    pub fn continuation_url(&self, pair: &HandoffPair, token: &TokenId) -> Url {
        let mut url = self.origin.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(pair.step.as_str())
                .push(pair.application_id.as_str());
        }
        url.set_query(None);
        url.query_pairs_mut().append_pair("token", token.as_str());
        url
    }

    pub fn describe(&self, record: &TokenRecord) -> TokenDescriptor {
        TokenDescriptor {
            token: record.token.clone(),
            pair: record.pair.clone(),
            expires_at: record.expires_at,
            continuation_url: self.continuation_url(&record.pair, &record.token),
        }
    }
}

/// Parses a continuation URL back into its pair and token.
pub fn parse_continuation_url(raw: &str) -> Result<(HandoffPair, TokenId), CoreError> {
    let url = Url::parse(raw).map_err(|err| CoreError::InvalidUrl(format!("{raw}: {err}")))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let [.., step, application_id] = segments.as_slice() else {
        return Err(CoreError::InvalidUrl(format!(
            "{raw}: expected /{{step}}/{{application id}}"
        )));
    };
    let step: StepId = step.parse()?;
    let application_id: ApplicationId = application_id.parse()?;
    let token = url
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CoreError::InvalidUrl(format!("{raw}: missing token parameter")))?;
    Ok((HandoffPair::new(application_id, step), TokenId::from(token)))
}
