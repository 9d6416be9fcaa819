use async_trait::async_trait;
use handoff_core::wire::{
    ActiveTokenResponse, CanGenerateResponse, GenerateRequest, GenerateResponse, RedeemRequest,
    RedeemResponse, StatusQuery,
};
use handoff_core::{HandoffPair, StatusReport, TokenDescriptor, TokenId};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::debug;

use crate::authority::Authority;
use crate::error::AuthorityError;

/// Talks to the handoff authority's `/api/qr` endpoints.
#[derive(Clone)]
pub struct HttpAuthority {
    http: Client,
    base_url: String,
}

impl HttpAuthority {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/qr/{}", self.base_url, path)
    }

    fn pair_path(&self, prefix: &str, pair: &HandoffPair) -> String {
        self.url(&format!("{}/{}/{}", prefix, pair.application_id, pair.step))
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, AuthorityError> {
    if res.status().is_success() {
        Ok(res.json::<T>().await?)
    } else {
        Err(status_error(res).await)
    }
}

async fn status_error(res: Response) -> AuthorityError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    AuthorityError::UnexpectedStatus { status, body }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn can_generate(&self, pair: &HandoffPair) -> Result<bool, AuthorityError> {
        let res = self
            .http
            .get(self.pair_path("can-generate", pair))
            .send()
            .await?;
        let body: CanGenerateResponse = decode(res).await?;
        Ok(body.can_generate)
    }

    async fn active_token(
        &self,
        pair: &HandoffPair,
    ) -> Result<Option<TokenDescriptor>, AuthorityError> {
        let res = self.http.get(self.pair_path("active", pair)).send().await?;
        let body: ActiveTokenResponse = decode(res).await?;
        let descriptor = body.into_descriptor()?;
        // A descriptor for some other pair is not ours to display.
        Ok(descriptor.filter(|d| &d.pair == pair))
    }

    async fn create_token(
        &self,
        pair: &HandoffPair,
        replace: bool,
    ) -> Result<TokenDescriptor, AuthorityError> {
        let request = GenerateRequest {
            visa_id: pair.application_id.clone(),
            page: pair.step.clone(),
            replace,
        };
        let res = self
            .http
            .post(self.url("generate"))
            .json(&request)
            .send()
            .await?;
        match res.status() {
            StatusCode::FORBIDDEN => Err(AuthorityError::Ineligible),
            StatusCode::CONFLICT => Err(AuthorityError::Conflict),
            _ => {
                let body: GenerateResponse = decode(res).await?;
                Ok(body.into_descriptor()?)
            }
        }
    }

    async fn token_status(
        &self,
        token: &TokenId,
        pair: &HandoffPair,
    ) -> Result<StatusReport, AuthorityError> {
        let res = self
            .http
            .get(self.url(&format!("status/{token}")))
            .query(&StatusQuery::for_pair(pair))
            .send()
            .await?;
        match res.status() {
            StatusCode::NOT_FOUND => Err(AuthorityError::NotFound),
            _ => decode(res).await,
        }
    }

    async fn redeem(
        &self,
        token: &TokenId,
        pair: &HandoffPair,
    ) -> Result<OffsetDateTime, AuthorityError> {
        let request = RedeemRequest {
            token: token.clone(),
            visa_id: pair.application_id.clone(),
            page: pair.step.clone(),
        };
        let res = self
            .http
            .post(self.url("redeem"))
            .json(&request)
            .send()
            .await?;
        match res.status() {
            StatusCode::NOT_FOUND => Err(AuthorityError::NotFound),
            StatusCode::CONFLICT => Err(AuthorityError::AlreadyUsed),
            StatusCode::GONE => Err(AuthorityError::Expired),
            _ => {
                let body: RedeemResponse = decode(res).await?;
                debug!(visa_id = %body.visa_id, page = %body.page, "continuation redeemed");
                Ok(body.redeemed_at)
            }
        }
    }

    async fn reset(&self, pair: &HandoffPair) -> Result<(), AuthorityError> {
        let res = self.http.post(self.pair_path("reset", pair)).send().await?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(status_error(res).await)
        }
    }
}
