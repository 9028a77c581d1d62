//! Compact-token (JWS) verification for platform-signed requests.
//!
//! Claims are only decoded after the RSA signature over `header.payload` checks out.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Rejection;
use crate::security::jwks::KeySetClient;

/// Registered and tenant claims carried by a platform token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawClaims")]
pub struct PlatformClaims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
}

/// Wire form: the tenant may arrive under any of four names, possibly several at once.
#[derive(Deserialize)]
struct RawClaims {
    iss: Option<String>,
    sub: Option<String>,
    exp: i64,
    iat: i64,
    #[serde(rename = "tenantId")]
    tenant_id_camel: Option<String>,
    #[serde(rename = "accountId")]
    account_id_camel: Option<String>,
    #[serde(rename = "tenant_id")]
    tenant_id_snake: Option<String>,
    #[serde(rename = "account_id")]
    account_id_snake: Option<String>,
}

impl From<RawClaims> for PlatformClaims {
    fn from(raw: RawClaims) -> Self {
        let tenant_id = [
            raw.tenant_id_camel,
            raw.account_id_camel,
            raw.tenant_id_snake,
            raw.account_id_snake,
        ]
        .into_iter()
        .flatten()
        .find(|id| !id.is_empty());

        Self {
            iss: raw.iss,
            sub: raw.sub,
            exp: raw.exp,
            iat: raw.iat,
            tenant_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: KeySetClient,
    issuer: Option<String>,
    audience: Option<String>,
    leeway_secs: u64,
}

impl TokenVerifier {
    pub fn new(
        keys: KeySetClient,
        issuer: Option<String>,
        audience: Option<String>,
        leeway_secs: u64,
    ) -> Self {
        Self {
            keys,
            issuer,
            audience,
            leeway_secs,
        }
    }

    /// Returns the validated claims; the tenant claim is guaranteed present.
    pub async fn verify(&self, token: &str) -> Result<PlatformClaims, Rejection> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(Rejection::MalformedToken(
                "expected three non-empty segments".to_string(),
            ));
        }

        let header = decode_header(token).map_err(|e| Rejection::MalformedToken(e.to_string()))?;
        if !matches!(
            header.alg,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
        ) {
            return Err(Rejection::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }
        let kid = header.kid.ok_or(Rejection::MissingKeyId)?;
        let key = self.keys.key_for(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway_secs;
        validation.set_required_spec_claims(&["exp"]);
        match &self.issuer {
            Some(iss) => validation.set_issuer(&[iss]),
            None => validation.iss = None,
        }
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<PlatformClaims>(token, &key, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => Rejection::InvalidSignature,
            ErrorKind::ExpiredSignature => Rejection::Expired,
            ErrorKind::InvalidIssuer => Rejection::InvalidClaims("issuer".to_string()),
            ErrorKind::InvalidAudience => Rejection::InvalidClaims("audience".to_string()),
            ErrorKind::ImmatureSignature => Rejection::InvalidClaims("not yet valid".to_string()),
            ErrorKind::MissingRequiredClaim(claim) => {
                Rejection::InvalidClaims(format!("missing {claim}"))
            }
            ErrorKind::InvalidAlgorithm => Rejection::UnsupportedAlgorithm(format!("{:?}", header.alg)),
            _ => Rejection::MalformedToken(e.to_string()),
        })?;
        let claims = data.claims;

        let now = Utc::now().timestamp();
        if claims.iat > now + self.leeway_secs as i64 {
            return Err(Rejection::InvalidClaims("issued in the future".to_string()));
        }
        if claims.tenant_id.as_deref().map_or(true, str::is_empty) {
            return Err(Rejection::InvalidClaims("missing tenant claim".to_string()));
        }

        debug!(kid = %kid, tenant_id = ?claims.tenant_id, "platform token verified");
        Ok(claims)
    }
}
