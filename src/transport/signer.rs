use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::security::request_signer::{
    compute_signature_base64, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::security::verifier::{VerifiedIdentity, VerifiedScheme, TOKEN_HEADER};
use crate::store::Tenant;

/// Timestamp and nonce for one outbound shared-secret signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningMeta {
    pub timestamp: i64,
    pub nonce: String,
}

impl SigningMeta {
    pub fn fresh() -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            nonce: Uuid::new_v4().simple().to_string(),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, BridgeError> {
    HeaderValue::from_str(value).map_err(|e| BridgeError::Internal(format!("invalid header value: {e}")))
}

/// Authenticates outbound calls with the scheme the inbound event was verified under.
///
/// Shared-secret: a fresh timestamp and nonce, HMAC'd over the new body with the
/// tenant's api key. Public-key: the platform's own token is forwarded unchanged, so
/// the receiver trusts the platform's assertion rather than one minted here.
#[derive(Debug, Clone, Default)]
pub struct OutboundSigner;

impl OutboundSigner {
    pub fn new() -> Self {
        Self
    }

    pub fn sign(
        &self,
        tenant: &Tenant,
        identity: &VerifiedIdentity,
        body: &[u8],
    ) -> Result<HeaderMap, BridgeError> {
        self.sign_with(tenant, identity, body, SigningMeta::fresh())
    }

    pub fn sign_with(
        &self,
        tenant: &Tenant,
        identity: &VerifiedIdentity,
        body: &[u8],
        meta: SigningMeta,
    ) -> Result<HeaderMap, BridgeError> {
        let mut headers = HeaderMap::new();
        match &identity.scheme {
            VerifiedScheme::SharedSecret => {
                let api_key = tenant
                    .api_key
                    .as_deref()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| {
                        BridgeError::Configuration(format!(
                            "no api key configured for tenant {}",
                            tenant.tenant_id
                        ))
                    })?;
                let sig = compute_signature_base64(api_key, body, meta.timestamp, &meta.nonce)
                    .map_err(|e| BridgeError::Internal(e.to_string()))?;

                debug!(
                    tenant_id = %tenant.tenant_id,
                    timestamp = %meta.timestamp,
                    nonce = %meta.nonce,
                    "building signed HMAC headers"
                );
                headers.insert(SIGNATURE_HEADER, header_value(&sig)?);
                headers.insert(TIMESTAMP_HEADER, header_value(&meta.timestamp.to_string())?);
                headers.insert(NONCE_HEADER, header_value(&meta.nonce)?);
            }
            VerifiedScheme::PublicKey { token, .. } => {
                debug!(tenant_id = %tenant.tenant_id, "forwarding platform token");
                headers.insert(TOKEN_HEADER, header_value(token)?);
            }
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rejection;
    use crate::security::request_signer::verify_signature_at;
    use crate::security::token::PlatformClaims;

    fn tenant(api_key: Option<&str>) -> Tenant {
        Tenant {
            tenant_id: "t-1".to_string(),
            api_key: api_key.map(str::to_string),
            ..Tenant::default()
        }
    }

    fn shared_identity() -> VerifiedIdentity {
        VerifiedIdentity {
            tenant_id: "t-1".to_string(),
            scheme: VerifiedScheme::SharedSecret,
        }
    }

    #[test]
    fn test_shared_secret_headers_verify_with_tenant_key() {
        let meta = SigningMeta {
            timestamp: 1_700_000_000,
            nonce: "nonce-1".to_string(),
        };
        let body = br#"{"tenantId":"t-1"}"#;
        let headers = OutboundSigner::new()
            .sign_with(&tenant(Some("key-1")), &shared_identity(), body, meta)
            .unwrap();

        let sig = headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        assert_eq!(headers.get(TIMESTAMP_HEADER).unwrap(), "1700000000");
        assert_eq!(headers.get(NONCE_HEADER).unwrap(), "nonce-1");
        assert!(verify_signature_at("key-1", body, sig, 1_700_000_000, "nonce-1", 300, 1_700_000_000).is_ok());
        assert_eq!(
            verify_signature_at("key-2", body, sig, 1_700_000_000, "nonce-1", 300, 1_700_000_000),
            Err(Rejection::SignatureMismatch)
        );
    }

    #[test]
    fn test_fresh_meta_uses_new_nonces() {
        let a = SigningMeta::fresh();
        let b = SigningMeta::fresh();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_shared_secret_without_api_key_is_configuration_error() {
        let result = OutboundSigner::new().sign(&tenant(None), &shared_identity(), b"{}");
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn test_public_key_token_passed_through() {
        let identity = VerifiedIdentity {
            tenant_id: "t-1".to_string(),
            scheme: VerifiedScheme::PublicKey {
                token: "h.p.s".to_string(),
                claims: PlatformClaims {
                    iss: None,
                    sub: None,
                    exp: 0,
                    iat: 0,
                    tenant_id: Some("t-1".to_string()),
                },
            },
        };
        let headers = OutboundSigner::new()
            .sign(&tenant(None), &identity, b"{}")
            .unwrap();
        assert_eq!(headers.get(TOKEN_HEADER).unwrap(), "h.p.s");
        assert!(headers.get(SIGNATURE_HEADER).is_none());
    }
}
