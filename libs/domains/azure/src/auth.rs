//! Azure AD client-credentials token source
//!
//! ARM calls carry a bearer token scoped to the management plane. Tokens
//! are cached until shortly before expiry; acquisition failures surface
//! as `AzureError::Auth` and are retried on the next call.

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AzureError, AzureResult};

const LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Refresh the token this long before its actual expiry.
const EXPIRY_MARGIN_SECS: i64 = 120;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Client-credentials token provider for the ARM management scope.
pub struct TokenProvider {
    http: Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> AzureResult<Self> {
        if tenant_id.is_empty() || client_id.is_empty() || client_secret.is_empty() {
            return Err(AzureError::InvalidConfig(
                "tenant id, client id and client secret are all required".to_string(),
            ));
        }
        Ok(Self {
            http: Client::new(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            cache: RwLock::new(None),
        })
    }

    /// A bearer token for the management scope, from cache when fresh.
    pub async fn bearer(&self) -> AzureResult<String> {
        let now = Utc::now();
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh(now) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited on the lock.
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.request_token().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn request_token(&self) -> AzureResult<CachedToken> {
        let url = format!("{}/{}/oauth2/v2.0/token", LOGIN_ENDPOINT, self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", MANAGEMENT_SCOPE),
        ];

        let response = self.http.post(&url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AzureError::Auth(format!(
                "token endpoint returned status {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AzureError::Auth(e.to_string()))?;

        debug!(expires_in = body.expires_in, "acquired management token");
        Ok(CachedToken {
            token: body.access_token,
            expires_at: Utc::now() + TimeDelta::seconds(body.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_requires_all_credentials() {
        assert!(TokenProvider::new("", "client", "secret").is_err());
        assert!(TokenProvider::new("tenant", "", "secret").is_err());
        assert!(TokenProvider::new("tenant", "client", "").is_err());
        assert!(TokenProvider::new("tenant", "client", "secret").is_ok());
    }

    #[test]
    fn test_cached_token_freshness_window() {
        let now = Utc::now();
        let fresh = CachedToken {
            token: "t".to_string(),
            expires_at: now + TimeDelta::seconds(600),
        };
        assert!(fresh.is_fresh(now));

        let nearly_expired = CachedToken {
            token: "t".to_string(),
            expires_at: now + TimeDelta::seconds(EXPIRY_MARGIN_SECS - 1),
        };
        assert!(!nearly_expired.is_fresh(now));
    }
}
