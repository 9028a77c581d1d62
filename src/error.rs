use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Why an inbound signature was not accepted.
///
/// Produced by the verifier before anything is parsed or stored; every variant is
/// terminal for the request that carried the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no signature headers present")]
    MissingSignature,
    #[error("malformed signature header: {0}")]
    MalformedHeader(String),
    #[error("stale request (timestamp skew {skew_secs}s)")]
    StaleTimestamp { skew_secs: u64 },
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("tenant could not be resolved for shared-secret verification")]
    TenantUnresolved,
    #[error("no api key configured for tenant {0}")]
    MissingApiKey(String),
    #[error("nonce already seen")]
    ReplayDetected,
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token header carries no key id")]
    MissingKeyId,
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),
    #[error("key set unavailable: {0}")]
    KeySetUnavailable(String),
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid token claims: {0}")]
    InvalidClaims(String),
    #[error("verified tenant does not match claimed tenant")]
    TenantMismatch,
    #[error("signature scheme not accepted on this endpoint")]
    SchemeNotAccepted,
}

/// Failure taxonomy surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    Validation(Rejection),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("downstream unavailable: {0}")]
    DownstreamUnavailable(String),
    #[error("provisioning rejected: {0}")]
    ProvisioningRejected(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Rejection> for BridgeError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::MissingApiKey(tenant_id) => {
                BridgeError::Configuration(format!("no api key configured for tenant {tenant_id}"))
            }
            Rejection::KeySetUnavailable(reason) => BridgeError::DownstreamUnavailable(reason),
            other => BridgeError::Validation(other),
        }
    }
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::Validation(_) => StatusCode::UNAUTHORIZED,
            BridgeError::Configuration(_) => StatusCode::PRECONDITION_FAILED,
            BridgeError::InvalidEvent(_) | BridgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::UnknownTenant(_) => StatusCode::NOT_FOUND,
            BridgeError::DownstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::ProvisioningRejected(_) | BridgeError::Upstream(_) => {
                StatusCode::BAD_GATEWAY
            }
            BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
