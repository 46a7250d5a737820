//! Bearer token authentication
//!
//! Tokens are JWTs signed by an external issuer that publishes its keys as a
//! JWKS document. Keys are cached and refetched when the cache ages out or a
//! token names a key id the cache has not seen (issuer key rotation).
//!
//! The verified claims become a [`CallerIdentity`]; nothing about the caller
//! is kept between requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use meridian_common::{CallerIdentity, Error, Result};

use crate::error::ApiError;

/// Verifies a bearer credential and maps it to a caller
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `token` and return the caller it identifies
    async fn authenticate(&self, token: &str) -> Result<CallerIdentity>;
}

/// Token verification settings
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// URL of the issuer's JWKS document
    pub jwks_url: String,
    /// Required `iss`, when set
    pub issuer: Option<String>,
    /// Required `aud`, when set
    pub audience: Option<String>,
    /// Claim holding the tenant id
    pub tenant_claim: String,
    /// Claim holding the caller's groups
    pub groups_claim: String,
    /// Group whose members are admins
    pub admin_group: String,
    /// Boolean claim marking admins
    pub admin_claim: String,
    /// Maximum age of the cached key set
    pub jwks_refresh_interval: Duration,
    /// Minimum gap between refetches triggered by unknown key ids
    pub jwks_min_refresh_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: String::new(),
            issuer: None,
            audience: None,
            tenant_claim: "tenant_id".to_string(),
            groups_claim: "groups".to_string(),
            admin_group: "meridian-admins".to_string(),
            admin_claim: "is_admin".to_string(),
            jwks_refresh_interval: Duration::from_secs(300),
            jwks_min_refresh_interval: Duration::from_secs(10),
        }
    }
}

/// A verification key and the algorithms it may be used with
#[derive(Clone)]
pub struct VerificationKey {
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
}

impl VerificationKey {
    /// Pair a decoding key with its permitted algorithms
    pub fn new(key: DecodingKey, algorithms: Vec<Algorithm>) -> Self {
        Self { key, algorithms }
    }
}

struct JwksCache {
    keys: HashMap<String, VerificationKey>,
    last_refresh: Instant,
}

/// Groups claim can be array or single string
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum GroupsClaim {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl GroupsClaim {
    fn into_vec(self) -> Vec<String> {
        match self {
            GroupsClaim::None => vec![],
            GroupsClaim::Single(s) => vec![s],
            GroupsClaim::Multiple(v) => v,
        }
    }
}

/// Claims this service reads; exp/iss/aud are checked by `decode`
#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Deserialize)]
struct JwkKey {
    kty: String,
    kid: Option<String>,
    alg: Option<String>,
    #[serde(rename = "use")]
    use_: Option<String>,
    n: Option<String>,
    e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

/// Verifies JWTs against a cached JWKS key set
pub struct JwksVerifier {
    config: AuthConfig,
    cache: RwLock<Option<JwksCache>>,
    http_client: reqwest::Client,
}

impl JwksVerifier {
    /// Create a verifier; keys are fetched on first use
    pub fn new(config: AuthConfig) -> Result<Self> {
        Ok(Self {
            config,
            cache: RwLock::new(None),
            http_client: build_http_client()?,
        })
    }

    /// Create a verifier with a pre-populated key set
    pub fn with_keys(config: AuthConfig, keys: HashMap<String, VerificationKey>) -> Result<Self> {
        Ok(Self {
            config,
            cache: RwLock::new(Some(JwksCache {
                keys,
                last_refresh: Instant::now(),
            })),
            http_client: build_http_client()?,
        })
    }

    /// Verification settings
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    async fn verification_key(&self, kid: Option<&str>) -> Result<VerificationKey> {
        let stale = {
            let cache = self.cache.read().await;
            match &*cache {
                None => true,
                Some(c) => c.last_refresh.elapsed() > self.config.jwks_refresh_interval,
            }
        };
        if stale {
            self.refresh().await?;
        } else if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        } else if self.may_refetch().await {
            debug!(kid = ?kid, "unknown key id, refetching JWKS");
            self.refresh().await?;
        }

        self.cached_key(kid).await.ok_or_else(|| {
            Error::Unauthenticated(format!("no signing key matches kid {:?}", kid))
        })
    }

    async fn cached_key(&self, kid: Option<&str>) -> Option<VerificationKey> {
        let cache = self.cache.read().await;
        let cache = cache.as_ref()?;
        match kid {
            Some(kid) => cache.keys.get(kid).cloned(),
            // Without a kid only an unambiguous key set can be used
            None if cache.keys.len() == 1 => cache.keys.values().next().cloned(),
            None => None,
        }
    }

    async fn may_refetch(&self) -> bool {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .map(|c| c.last_refresh.elapsed() >= self.config.jwks_min_refresh_interval)
            .unwrap_or(true)
    }

    async fn refresh(&self) -> Result<()> {
        debug!(url = %self.config.jwks_url, "fetching JWKS");
        let document: JwksDocument = self
            .http_client
            .get(&self.config.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::internal(format!("failed to fetch JWKS: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::internal(format!("invalid JWKS response: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in document.keys {
            if jwk.use_.as_deref() == Some("enc") {
                continue;
            }
            if let Some(key) = jwk_to_key(&jwk)? {
                let kid = jwk.kid.unwrap_or_else(|| "default".to_string());
                keys.insert(kid, key);
            }
        }
        if keys.is_empty() {
            return Err(Error::internal("JWKS contains no usable signing keys"));
        }

        info!(key_count = keys.len(), "refreshed JWKS cache");
        *self.cache.write().await = Some(JwksCache {
            keys,
            last_refresh: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl Authenticator for JwksVerifier {
    async fn authenticate(&self, token: &str) -> Result<CallerIdentity> {
        let header = decode_header(token)
            .map_err(|e| Error::Unauthenticated(format!("malformed token: {}", e)))?;
        let key = self.verification_key(header.kid.as_deref()).await?;
        if !key.algorithms.contains(&header.alg) {
            return Err(Error::Unauthenticated(format!(
                "algorithm {:?} is not allowed for this key",
                header.alg
            )));
        }

        let mut validation = Validation::new(header.alg);
        validation.algorithms = key.algorithms.clone();
        validation.validate_exp = true;
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let claims = decode::<Claims>(token, &key.key, &validation)
            .map_err(|e| Error::Unauthenticated(format!("invalid token: {}", e)))?
            .claims;
        let identity = identity_from_claims(claims, &self.config)?;
        debug!(
            subject = %identity.subject,
            tenant = %identity.tenant_id,
            admin = identity.is_admin,
            "token verified"
        );
        Ok(identity)
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::internal(format!("failed to create HTTP client: {}", e)))
}

fn jwk_to_key(jwk: &JwkKey) -> Result<Option<VerificationKey>> {
    let declared = jwk.alg.as_deref().and_then(|a| a.parse::<Algorithm>().ok());
    let missing = |field: &str| Error::internal(format!("{} key missing '{}'", jwk.kty, field));

    let (key, family) = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_ref().ok_or_else(|| missing("n"))?;
            let e = jwk.e.as_ref().ok_or_else(|| missing("e"))?;
            let key = DecodingKey::from_rsa_components(n, e)
                .map_err(|e| Error::internal(format!("invalid RSA key: {}", e)))?;
            (
                key,
                vec![
                    Algorithm::RS256,
                    Algorithm::RS384,
                    Algorithm::RS512,
                    Algorithm::PS256,
                    Algorithm::PS384,
                    Algorithm::PS512,
                ],
            )
        }
        "EC" => {
            let crv = jwk.crv.as_ref().ok_or_else(|| missing("crv"))?;
            let x = jwk.x.as_ref().ok_or_else(|| missing("x"))?;
            let y = jwk.y.as_ref().ok_or_else(|| missing("y"))?;
            let alg = match crv.as_str() {
                "P-256" => Algorithm::ES256,
                "P-384" => Algorithm::ES384,
                _ => {
                    warn!(crv = %crv, "unsupported EC curve");
                    return Ok(None);
                }
            };
            let key = DecodingKey::from_ec_components(x, y)
                .map_err(|e| Error::internal(format!("invalid EC key: {}", e)))?;
            (key, vec![alg])
        }
        kty => {
            warn!(kty = %kty, "unsupported key type");
            return Ok(None);
        }
    };

    let algorithms = match declared {
        Some(alg) if family.contains(&alg) => vec![alg],
        Some(alg) => {
            warn!(kid = ?jwk.kid, alg = ?alg, "key declares an algorithm outside its family");
            return Ok(None);
        }
        None => family,
    };
    Ok(Some(VerificationKey::new(key, algorithms)))
}

fn identity_from_claims(mut claims: Claims, config: &AuthConfig) -> Result<CallerIdentity> {
    let subject = claims
        .sub
        .take()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Unauthenticated("token has no subject".into()))?;

    let groups = claims
        .extra
        .remove(&config.groups_claim)
        .and_then(|v| serde_json::from_value::<GroupsClaim>(v).ok())
        .unwrap_or_default()
        .into_vec();
    let admin_flag = claims
        .extra
        .get(&config.admin_claim)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let is_admin = admin_flag || groups.iter().any(|g| g == &config.admin_group);

    let tenant_id = claims
        .extra
        .get(&config.tenant_claim)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    match tenant_id {
        Some(tenant_id) => Ok(CallerIdentity {
            subject,
            tenant_id,
            is_admin,
        }),
        None if is_admin => Ok(CallerIdentity {
            subject,
            tenant_id: String::new(),
            is_admin,
        }),
        None => Err(Error::Unauthenticated(format!(
            "token has no '{}' claim",
            config.tenant_claim
        ))),
    }
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware verifying the bearer token and attaching the caller
pub async fn require_identity(
    State(auth): State<Arc<dyn Authenticator>>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| Error::Unauthenticated("missing bearer token".into()))?;
    let identity = auth.authenticate(token).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// The authenticated caller of a request
#[derive(Clone, Debug)]
pub struct Caller(pub CallerIdentity);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| ApiError(Error::Unauthenticated("request is not authenticated".into())))
    }
}
