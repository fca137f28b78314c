//! Authentication extractors.
//!
//! This module provides extractors for:
//! - `AuthUser` - End-user authentication via ID token
//! - `AdminAuth` - Operator authentication for privileged endpoints
//!
//! Anonymous sign-ins pass extraction as unauthenticated principals; the
//! ledger rejects them on every credit operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use credit_ledger_core::{AccountId, Principal};

use crate::config::ServiceConfig;
use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Constants
// ============================================================================

/// How long to cache JWKS keys before refreshing.
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600); // 1 hour

/// Timeout for JWKS fetch requests.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Sign-in provider name the identity service uses for guest sessions.
const ANONYMOUS_PROVIDER: &str = "anonymous";

/// A caller identified by an ID token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The ledger identity of the caller.
    pub principal: Principal,
    /// The raw subject claim.
    pub subject: String,
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthenticated)
}

/// Resolve `test-token:<id>` and `test-anon:<id>` bearer tokens.
#[cfg(any(test, feature = "test-auth"))]
fn test_user(token: &str) -> Option<Result<AuthUser, ApiError>> {
    let (subject, authenticated) = if let Some(id) = token.strip_prefix("test-token:") {
        (id, true)
    } else {
        (token.strip_prefix("test-anon:")?, false)
    };

    Some(
        AccountId::new(subject)
            .map(|account_id| AuthUser {
                principal: if authenticated {
                    Principal::authenticated(account_id)
                } else {
                    Principal::anonymous(account_id)
                },
                subject: subject.to_string(),
            })
            .map_err(|_| ApiError::Unauthenticated),
    )
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        // Allow test tokens in testing only.
        // This bypass is gated behind #[cfg(test)] or the "test-auth" feature
        // to ensure it is never active in production builds.
        #[cfg(any(test, feature = "test-auth"))]
        if let Some(user) = test_user(token) {
            return user;
        }

        let claims = state.jwks.validate(token, &state.config).await?;
        let account_id = AccountId::new(claims.sub.as_str()).map_err(|e| {
            tracing::debug!(error = %e, "Token subject is not a valid account ID");
            ApiError::Unauthenticated
        })?;

        let principal = if claims.is_anonymous() {
            Principal::anonymous(account_id)
        } else {
            Principal::authenticated(account_id)
        };

        Ok(AuthUser {
            principal,
            subject: claims.sub,
        })
    }
}

/// Operator authentication via API key.
///
/// Requires the `X-Admin-Key` header to match the configured admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_deref()
            .ok_or(ApiError::Unauthenticated)?;

        if !constant_time_eq(admin_key, expected_key) {
            tracing::warn!("Rejected admin request with wrong key");
            return Err(ApiError::Unauthenticated);
        }

        let admin_id = parts
            .headers
            .get("x-admin-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(AdminAuth { admin_id })
    }
}

/// Claims of an identity-provider ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Subject (account ID).
    pub sub: String,
    /// Audience (can be string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Issuer.
    pub iss: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    pub iat: i64,
    /// Provider-specific sign-in details.
    #[serde(default)]
    pub firebase: Option<SignInClaims>,
}

/// How the subject signed in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignInClaims {
    /// e.g. `password`, `google.com` or `anonymous`.
    #[serde(default)]
    pub sign_in_provider: Option<String>,
}

impl IdTokenClaims {
    /// Whether the token belongs to a guest session.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.firebase
            .as_ref()
            .and_then(|f| f.sign_in_provider.as_deref())
            == Some(ANONYMOUS_PROVIDER)
    }
}

// ============================================================================
// JWKS Client and JWT Validation
// ============================================================================

/// JWKS (JSON Web Key Set) response structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    /// List of JWK keys.
    pub keys: Vec<Jwk>,
}

/// Single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256").
    pub alg: Option<String>,
    /// RSA public key modulus (base64url encoded).
    pub n: Option<String>,
    /// RSA public key exponent (base64url encoded).
    pub e: Option<String>,
    /// Key use (e.g., "sig" for signature).
    #[serde(rename = "use")]
    pub key_use: Option<String>,
}

#[derive(Default)]
struct CachedKeys {
    /// Keys mapped by kid.
    keys: HashMap<String, DecodingKey>,
    /// Default key (for tokens without kid).
    default_key: Option<DecodingKey>,
    /// When the keys were fetched; `None` before the first fetch.
    fetched_at: Option<Instant>,
}

impl CachedKeys {
    fn is_expired(&self) -> bool {
        self.fetched_at
            .map_or(true, |at| at.elapsed() >= JWKS_CACHE_DURATION)
    }

    fn get(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.keys.get(kid).cloned(),
            None => self.default_key.clone(),
        }
    }
}

/// Signing keys of the identity provider, refreshed hourly.
///
/// Lives in [`AppState`] so each service instance owns its cache.
pub struct JwksCache {
    /// Reused for connection pooling.
    client: reqwest::Client,
    cached: RwLock<CachedKeys>,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    /// Create an empty cache; keys are fetched on first use.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            cached: RwLock::new(CachedKeys::default()),
        }
    }

    /// Validate an ID token's signature, issuer, audience and expiry.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for invalid tokens and `ExternalService` if
    /// the keys cannot be fetched.
    pub async fn validate(
        &self,
        token: &str,
        config: &ServiceConfig,
    ) -> Result<IdTokenClaims, ApiError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Failed to decode JWT header");
            ApiError::Unauthenticated
        })?;

        let decoding_key = self
            .decoding_key(header.kid.as_deref(), &config.auth_jwks_url)
            .await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&config.auth_audience]);
        validation.set_issuer(&[&config.auth_issuer]);

        let token_data =
            decode::<IdTokenClaims>(token, &decoding_key, &validation).map_err(|e| {
                tracing::debug!(error = %e, "JWT validation failed");
                ApiError::Unauthenticated
            })?;

        Ok(token_data.claims)
    }

    async fn decoding_key(
        &self,
        kid: Option<&str>,
        jwks_url: &str,
    ) -> Result<DecodingKey, ApiError> {
        {
            let cached = self.cached.read().await;
            if !cached.is_expired() {
                if let Some(key) = cached.get(kid) {
                    return Ok(key);
                }
            }
        }

        // Cache miss or expired - fetch JWKS
        let jwks = self.fetch(jwks_url).await?;

        let mut cached = self.cached.write().await;
        *cached = CachedKeys {
            fetched_at: Some(Instant::now()),
            ..CachedKeys::default()
        };

        for jwk in &jwks.keys {
            if let Some(decoding_key) = jwk_to_decoding_key(jwk) {
                if let Some(key_kid) = &jwk.kid {
                    cached.keys.insert(key_kid.clone(), decoding_key.clone());
                }
                if cached.default_key.is_none() {
                    cached.default_key = Some(decoding_key);
                }
            }
        }

        cached.get(kid).ok_or(ApiError::Unauthenticated)
    }

    async fn fetch(&self, jwks_url: &str) -> Result<Jwks, ApiError> {
        tracing::debug!(url = %jwks_url, "Fetching JWKS");

        let response = self.client.get(jwks_url).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %jwks_url, "Failed to fetch JWKS");
            ApiError::ExternalService("Failed to fetch authentication keys".into())
        })?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                url = %jwks_url,
                "JWKS fetch returned non-success status"
            );
            return Err(ApiError::ExternalService(
                "Failed to fetch authentication keys".into(),
            ));
        }

        let jwks: Jwks = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse JWKS response");
            ApiError::ExternalService("Failed to parse authentication keys".into())
        })?;

        tracing::info!(keys_count = %jwks.keys.len(), "JWKS fetched successfully");

        Ok(jwks)
    }
}

/// Convert a JWK to a `DecodingKey`.
fn jwk_to_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    // Only support RSA keys for now
    if jwk.kty != "RSA" {
        tracing::debug!(kty = %jwk.kty, "Skipping non-RSA JWK");
        return None;
    }

    let n = jwk.n.as_ref()?;
    let e = jwk.e.as_ref()?;

    DecodingKey::from_rsa_components(n, e).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(provider: Option<&str>) -> IdTokenClaims {
        IdTokenClaims {
            sub: "user-1".into(),
            aud: None,
            iss: "issuer".into(),
            exp: 0,
            iat: 0,
            firebase: Some(SignInClaims {
                sign_in_provider: provider.map(str::to_string),
            }),
        }
    }

    #[test]
    fn anonymous_provider_marks_guest_tokens() {
        assert!(claims(Some("anonymous")).is_anonymous());
        assert!(!claims(Some("google.com")).is_anonymous());
        assert!(!claims(None).is_anonymous());
    }

    #[test]
    fn firebase_claims_deserialize() {
        let claims: IdTokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "abc",
            "iss": "https://securetoken.google.com/p",
            "aud": "p",
            "exp": 1,
            "iat": 0,
            "firebase": { "sign_in_provider": "anonymous", "identities": {} }
        }))
        .unwrap();
        assert!(claims.is_anonymous());
    }

    #[test]
    fn test_tokens_resolve_principals() {
        let user = test_user("test-token:user-1").unwrap().unwrap();
        assert!(user.principal.is_authenticated);
        assert_eq!(user.principal.account_id.as_str(), "user-1");

        let guest = test_user("test-anon:guest-1").unwrap().unwrap();
        assert!(!guest.principal.is_authenticated);

        assert!(test_user("eyJhbGciOi").is_none());
        assert!(test_user("test-token:").unwrap().is_err());
    }

    #[test]
    fn non_rsa_keys_are_skipped() {
        let jwk = Jwk {
            kty: "EC".into(),
            kid: Some("k1".into()),
            alg: None,
            n: None,
            e: None,
            key_use: None,
        };
        assert!(jwk_to_decoding_key(&jwk).is_none());
    }
}
