//! Google/Firebase ID-token verification and the institutional email gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, Result};

const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub const FORBIDDEN_MESSAGE: &str = "Only TCE student emails are allowed";

/// Claims the gateway reads from a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "sub")]
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedUser {
    #[serde(rename = "uid")]
    pub id: String,
    pub email: String,
    #[serde(rename = "name")]
    pub display_name: String,
}

/// A domain mismatch is a business answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Authorized(AuthorizedUser),
    Forbidden(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Checks signature, expiry, audience and issuer. Any failure,
    /// including an unreachable provider, is an `AuthError`.
    async fn verify_token(&self, id_token: &str) -> Result<TokenClaims>;
}

struct CachedKeys {
    fetched: Instant,
    set: JwkSet,
}

pub struct GoogleIdentityProvider {
    client: Client,
    project_id: String,
    keys: RwLock<Option<CachedKeys>>,
}

impl GoogleIdentityProvider {
    pub fn new(project_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            project_id: project_id.into(),
            keys: RwLock::new(None),
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);
        validation
    }

    async fn fetch_keys(&self) -> Result<JwkSet> {
        let auth_error = |e: reqwest::Error| AppError::AuthError(format!("Cannot load Google signing keys: {}", e));

        let set = self
            .client
            .get(GOOGLE_JWKS_URL)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(auth_error)?
            .json::<JwkSet>()
            .await
            .map_err(auth_error)?;

        tracing::debug!(keys = set.keys.len(), "Refreshed Google signing keys");
        Ok(set)
    }

    /// Uses the cached key set while it is young; an unknown `kid` forces a refresh.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        {
            let keys = self.keys.read().await;
            if let Some(cached) = keys.as_ref().filter(|c| c.fetched.elapsed() < KEY_REFRESH_INTERVAL) {
                if let Some(jwk) = cached.set.find(kid) {
                    return DecodingKey::from_jwk(jwk)
                        .map_err(|e| AppError::AuthError(format!("Unusable signing key {}: {}", kid, e)));
                }
            }
        }

        let set = self.fetch_keys().await?;
        let key = set
            .find(kid)
            .ok_or_else(|| AppError::AuthError(format!("Unknown signing key {}", kid)))
            .and_then(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .map_err(|e| AppError::AuthError(format!("Unusable signing key {}: {}", kid, e)))
            });

        *self.keys.write().await = Some(CachedKeys {
            fetched: Instant::now(),
            set,
        });

        key
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    async fn verify_token(&self, id_token: &str) -> Result<TokenClaims> {
        let header = decode_header(id_token)
            .map_err(|e| AppError::AuthError(format!("Malformed token: {}", e)))?;

        if header.alg != Algorithm::RS256 {
            return Err(AppError::AuthError(format!("Unexpected token algorithm {:?}", header.alg)));
        }

        let kid = header
            .kid
            .ok_or_else(|| AppError::AuthError("Token header has no kid".to_string()))?;

        let key = self.decoding_key(&kid).await?;
        let data = decode::<TokenClaims>(id_token, &key, &self.validation())
            .map_err(|e| AppError::AuthError(format!("Token rejected: {}", e)))?;

        if data.claims.uid.is_empty() {
            return Err(AppError::AuthError("Token has an empty subject".to_string()));
        }

        Ok(data.claims)
    }
}

/// Case-insensitive suffix check. `domain` is expected to start with `@`.
pub fn email_in_domain(email: &str, domain: &str) -> bool {
    email.to_ascii_lowercase().ends_with(&domain.to_ascii_lowercase())
}

pub struct Verifier {
    provider: Arc<dyn IdentityProvider>,
    allowed_domain: String,
}

impl Verifier {
    pub fn new(provider: Arc<dyn IdentityProvider>, allowed_domain: impl Into<String>) -> Self {
        let mut allowed_domain = allowed_domain.into();
        if !allowed_domain.starts_with('@') {
            allowed_domain.insert(0, '@');
        }

        Self {
            provider,
            allowed_domain,
        }
    }

    pub fn allowed_domain(&self) -> &str {
        &self.allowed_domain
    }

    pub async fn verify(&self, id_token: &str) -> Result<VerifyOutcome> {
        let claims = self.provider.verify_token(id_token).await?;
        Ok(self.authorize(claims))
    }

    pub fn authorize(&self, claims: TokenClaims) -> VerifyOutcome {
        let Some(email) = claims
            .email
            .filter(|email| email_in_domain(email, &self.allowed_domain))
        else {
            return VerifyOutcome::Forbidden(FORBIDDEN_MESSAGE.to_string());
        };

        let display_name = claims
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        VerifyOutcome::Authorized(AuthorizedUser {
            id: claims.uid,
            email,
            display_name,
        })
    }
}
