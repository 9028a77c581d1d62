use axum::http::HeaderMap;
use bytes::Bytes;
use tracing::debug;

use crate::error::Rejection;
use crate::security::audit_log::AuditLogger;
use crate::security::replay::NonceGuard;
use crate::security::request_signer::{
    verify_signature, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::security::token::{PlatformClaims, TokenVerifier};
use crate::store::TenantStore;

pub const TOKEN_HEADER: &str = "X-Platform-Token";

/// Authentication material carried next to the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    SharedSecret {
        signature: String,
        timestamp: i64,
        nonce: String,
    },
    PublicKey {
        token: String,
    },
}

/// Raw payload plus its signature. Nothing in it is trusted until `verify` succeeds.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    pub payload: Bytes,
    pub credential: Credential,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

impl SignedEnvelope {
    /// Picks the scheme from the header shape: a compact token wins over HMAC headers.
    pub fn from_request(headers: &HeaderMap, payload: Bytes) -> Result<Self, Rejection> {
        if let Some(token) = header_str(headers, TOKEN_HEADER) {
            return Ok(Self {
                payload,
                credential: Credential::PublicKey {
                    token: token.to_string(),
                },
            });
        }

        let signature = header_str(headers, SIGNATURE_HEADER);
        let timestamp = header_str(headers, TIMESTAMP_HEADER);
        let nonce = header_str(headers, NONCE_HEADER);
        if signature.is_none() && timestamp.is_none() && nonce.is_none() {
            return Err(Rejection::MissingSignature);
        }

        let signature = signature
            .ok_or_else(|| Rejection::MalformedHeader(format!("missing {SIGNATURE_HEADER}")))?;
        let timestamp = timestamp
            .ok_or_else(|| Rejection::MalformedHeader(format!("missing {TIMESTAMP_HEADER}")))?
            .parse::<i64>()
            .map_err(|_| Rejection::MalformedHeader(format!("invalid {TIMESTAMP_HEADER}")))?;
        let nonce =
            nonce.ok_or_else(|| Rejection::MalformedHeader(format!("missing {NONCE_HEADER}")))?;

        Ok(Self {
            payload,
            credential: Credential::SharedSecret {
                signature: signature.to_string(),
                timestamp,
                nonce: nonce.to_string(),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifiedScheme {
    SharedSecret,
    /// The validated token is kept so the relay can pass it through unchanged.
    PublicKey {
        token: String,
        claims: PlatformClaims,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub tenant_id: String,
    pub scheme: VerifiedScheme,
}

impl VerifiedIdentity {
    pub fn scheme_name(&self) -> &'static str {
        match self.scheme {
            VerifiedScheme::SharedSecret => "shared_secret",
            VerifiedScheme::PublicKey { .. } => "public_key",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    store: TenantStore,
    tokens: TokenVerifier,
    max_skew_secs: i64,
    nonces: Option<NonceGuard>,
    audit: AuditLogger,
}

impl SignatureVerifier {
    pub fn new(store: TenantStore, tokens: TokenVerifier, max_skew_secs: i64) -> Self {
        Self {
            store,
            tokens,
            max_skew_secs,
            nonces: None,
            audit: AuditLogger::new(),
        }
    }

    /// Reject a second use of a (tenant, nonce) pair inside the freshness window.
    pub fn with_nonce_guard(mut self) -> Self {
        self.nonces = Some(NonceGuard::new_ttl(self.max_skew_secs.max(0) as u64));
        self
    }

    /// Pure with respect to the envelope: a rejection leaves no trace beyond the audit log
    /// (and, when enabled, the nonce guard only records accepted signatures).
    pub async fn verify(
        &self,
        envelope: &SignedEnvelope,
        claimed_tenant: Option<&str>,
    ) -> Result<VerifiedIdentity, Rejection> {
        let result = match &envelope.credential {
            Credential::SharedSecret {
                signature,
                timestamp,
                nonce,
            } => {
                self.verify_shared_secret(&envelope.payload, signature, *timestamp, nonce, claimed_tenant)
                    .await
            }
            Credential::PublicKey { token } => self.verify_public_key(token, claimed_tenant).await,
        };

        match &result {
            Ok(identity) => self
                .audit
                .signature_accepted(&identity.tenant_id, identity.scheme_name()),
            Err(Rejection::ReplayDetected) => {
                self.audit.replay_detected(claimed_tenant.unwrap_or(""))
            }
            Err(rejection) => self
                .audit
                .signature_rejected(claimed_tenant, &rejection.to_string()),
        }
        result
    }

    async fn verify_shared_secret(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: i64,
        nonce: &str,
        claimed_tenant: Option<&str>,
    ) -> Result<VerifiedIdentity, Rejection> {
        let tenant_id = claimed_tenant.ok_or(Rejection::TenantUnresolved)?;
        let api_key = self
            .store
            .get(tenant_id)
            .and_then(|t| t.api_key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Rejection::MissingApiKey(tenant_id.to_string()))?;

        verify_signature(&api_key, payload, signature, timestamp, nonce, self.max_skew_secs)?;

        if let Some(guard) = &self.nonces {
            guard.check_and_store(tenant_id, nonce).await?;
        }

        debug!(tenant_id = %tenant_id, "shared-secret signature verified");
        Ok(VerifiedIdentity {
            tenant_id: tenant_id.to_string(),
            scheme: VerifiedScheme::SharedSecret,
        })
    }

    async fn verify_public_key(
        &self,
        token: &str,
        claimed_tenant: Option<&str>,
    ) -> Result<VerifiedIdentity, Rejection> {
        let claims = self.tokens.verify(token).await?;
        let tenant_id = claims
            .tenant_id
            .clone()
            .ok_or_else(|| Rejection::InvalidClaims("missing tenant claim".to_string()))?;

        if claimed_tenant.is_some_and(|claimed| claimed != tenant_id) {
            return Err(Rejection::TenantMismatch);
        }

        Ok(VerifiedIdentity {
            tenant_id,
            scheme: VerifiedScheme::PublicKey {
                token: token.to_string(),
                claims,
            },
        })
    }
}
