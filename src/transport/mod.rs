pub mod proxy;
pub mod relay;
pub mod signer;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::ClientCredentials;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsPayload {
    pub client_id: String,
    pub client_secret: String,
}

impl From<&ClientCredentials> for CredentialsPayload {
    fn from(creds: &ClientCredentials) -> Self {
        Self {
            client_id: creds.client_id.clone(),
            client_secret: creds.client_secret.clone(),
        }
    }
}

/// Outbound body for the provisioning API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequest {
    pub tenant_id: String,
    pub client_credentials: CredentialsPayload,
    pub event_type: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn empty_data() -> Value {
    serde_json::json!({})
}

/// Inbound webhook body from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_type: String,
    #[serde(default = "empty_data")]
    pub event_data: Value,
}
