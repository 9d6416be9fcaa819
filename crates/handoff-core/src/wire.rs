//! JSON bodies exchanged between the wizard clients and the authority.
//! Field names follow the wizard's existing API (`visaId`, `page`, `qrUrl`).

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::{ApplicationId, CoreError, StepId, TokenDescriptor, TokenId, TokenStatus};
use crate::{ContinuationBase, HandoffPair, TokenRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanGenerateResponse {
    pub can_generate: bool,
}

/// `status` is `"none"` when the pair has no active token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTokenResponse {
    pub valid: bool,
    pub status: String,
    pub visa_id: ApplicationId,
    pub page: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_url: Option<String>,
}

impl ActiveTokenResponse {
    pub fn none(pair: &HandoffPair) -> Self {
        Self {
            valid: false,
            status: "none".into(),
            visa_id: pair.application_id.clone(),
            page: pair.step.clone(),
            token: None,
            expires_at: None,
            qr_url: None,
        }
    }

    pub fn active(base: &ContinuationBase, record: &TokenRecord) -> Self {
        Self {
            valid: true,
            status: TokenStatus::Active.as_str().into(),
            visa_id: record.pair.application_id.clone(),
            page: record.pair.step.clone(),
            token: Some(record.token.clone()),
            expires_at: Some(record.expires_at),
            qr_url: Some(base.continuation_url(&record.pair, &record.token).into()),
        }
    }

    /// `None` unless the response carries a usable token.
    pub fn into_descriptor(self) -> Result<Option<TokenDescriptor>, CoreError> {
        let (true, Some(token), Some(expires_at), Some(qr_url)) =
            (self.valid, self.token, self.expires_at, self.qr_url)
        else {
            return Ok(None);
        };
        Ok(Some(TokenDescriptor {
            token,
            pair: HandoffPair::new(self.visa_id, self.page),
            expires_at,
            continuation_url: parse_url(&qr_url)?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub visa_id: ApplicationId,
    pub page: StepId,
    /// Supersede a still-active token instead of conflicting with it.
    #[serde(default)]
    pub replace: bool,
}

impl GenerateRequest {
    pub fn pair(&self) -> HandoffPair {
        HandoffPair::new(self.visa_id.clone(), self.page.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub qr_url: String,
    pub token: TokenId,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub page: StepId,
    pub visa_id: ApplicationId,
}

impl GenerateResponse {
    pub fn from_descriptor(descriptor: &TokenDescriptor) -> Self {
        Self {
            qr_url: descriptor.continuation_url.to_string(),
            token: descriptor.token.clone(),
            expires_at: descriptor.expires_at,
            page: descriptor.pair.step.clone(),
            visa_id: descriptor.pair.application_id.clone(),
        }
    }

    pub fn into_descriptor(self) -> Result<TokenDescriptor, CoreError> {
        Ok(TokenDescriptor {
            continuation_url: parse_url(&self.qr_url)?,
            token: self.token,
            pair: HandoffPair::new(self.visa_id, self.page),
            expires_at: self.expires_at,
        })
    }
}

/// Query string of the status poll; both halves are required by the
/// authority's consistency check when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visa_id: Option<ApplicationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<StepId>,
}

impl StatusQuery {
    pub fn for_pair(pair: &HandoffPair) -> Self {
        Self {
            visa_id: Some(pair.application_id.clone()),
            page: Some(pair.step.clone()),
        }
    }

    pub fn pair(&self) -> Option<HandoffPair> {
        match (&self.visa_id, &self.page) {
            (Some(visa_id), Some(page)) => Some(HandoffPair::new(visa_id.clone(), page.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub token: TokenId,
    pub visa_id: ApplicationId,
    pub page: StepId,
}

impl RedeemRequest {
    pub fn pair(&self) -> HandoffPair {
        HandoffPair::new(self.visa_id.clone(), self.page.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub visa_id: ApplicationId,
    pub page: StepId,
    #[serde(with = "time::serde::rfc3339")]
    pub redeemed_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

fn parse_url(raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|err| CoreError::InvalidUrl(format!("{raw}: {err}")))
}
