use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::agent::config::ProvisioningConfig;
use crate::error::BridgeError;
use crate::security::audit_log::AuditLogger;
use crate::security::verifier::VerifiedIdentity;
use crate::store::{Tenant, TenantStore};
use crate::transport::signer::OutboundSigner;
use crate::transport::{CredentialsPayload, ProvisioningRequest, ProvisioningResponse, WebhookEvent};

/// A structurally valid provisioning answer, whether it accepted the event or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RelayOutcome {
    Accepted {
        #[serde(skip_serializing_if = "Option::is_none")]
        instance_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        webhook_url: Option<String>,
    },
    Rejected {
        error: String,
    },
}

/// Signed, single-attempt calls to the provisioning API.
#[derive(Debug, Clone)]
pub struct ProvisioningClient {
    http_client: Client,
    config: ProvisioningConfig,
    signer: OutboundSigner,
    store: TenantStore,
    audit: AuditLogger,
}

impl ProvisioningClient {
    pub fn new(http_client: Client, config: ProvisioningConfig, store: TenantStore) -> Self {
        Self {
            http_client,
            config,
            signer: OutboundSigner::new(),
            store,
            audit: AuditLogger::new(),
        }
    }

    /// Transport failures and non-2xx statuses are `DownstreamUnavailable`; a 2xx
    /// `{success:false}` body is a `Rejected` outcome. On acceptance the returned
    /// webhook url and instance id are written back to the tenant record.
    pub async fn send(
        &self,
        tenant: &Tenant,
        identity: &VerifiedIdentity,
        event_type: &str,
        metadata: Map<String, Value>,
    ) -> Result<RelayOutcome, BridgeError> {
        let request = ProvisioningRequest {
            tenant_id: tenant.tenant_id.clone(),
            client_credentials: CredentialsPayload::from(&tenant.credentials),
            event_type: event_type.to_string(),
            metadata,
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| BridgeError::Internal(format!("serialize provisioning body: {e}")))?;
        let headers = self.signer.sign(tenant, identity, &body)?;
        let url = self.config.endpoint_for(tenant.region.as_deref());

        debug!(tenant_id = %tenant.tenant_id, event_type = %event_type, url = %url, "calling provisioning API");

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| BridgeError::DownstreamUnavailable(format!("provisioning API: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(tenant_id = %tenant.tenant_id, status = %status, body = %text, "provisioning API returned error status");
            return Err(BridgeError::DownstreamUnavailable(format!(
                "provisioning API returned {status}"
            )));
        }

        let parsed: ProvisioningResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Upstream(format!("unparseable provisioning response: {e}")))?;
        self.audit
            .provisioning_result(&tenant.tenant_id, event_type, parsed.success);

        if !parsed.success {
            return Ok(RelayOutcome::Rejected {
                error: parsed
                    .error
                    .unwrap_or_else(|| "provisioning failed without detail".to_string()),
            });
        }

        if let Some(url) = parsed.webhook_url.as_deref() {
            if !self.store.upsert_webhook_url(&tenant.tenant_id, url) {
                warn!(tenant_id = %tenant.tenant_id, "tenant removed while provisioning, webhook url not stored");
            }
        }
        if let Some(instance_id) = parsed.instance_id.as_deref() {
            self.store.upsert_instance_id(&tenant.tenant_id, instance_id);
        }

        Ok(RelayOutcome::Accepted {
            instance_id: parsed.instance_id,
            webhook_url: parsed.webhook_url,
        })
    }
}

/// Result of forwarding one webhook event downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub tenant_id: String,
    pub event_type: String,
    pub delivered: bool,
    pub status: u16,
    pub response: Value,
}

/// Forwards verified webhook events to the tenant's sink.
#[derive(Debug, Clone)]
pub struct WebhookRelay {
    http_client: Client,
    default_sink: String,
    signer: OutboundSigner,
    audit: AuditLogger,
}

impl WebhookRelay {
    pub fn new(http_client: Client, default_sink: String) -> Self {
        Self {
            http_client,
            default_sink,
            signer: OutboundSigner::new(),
            audit: AuditLogger::new(),
        }
    }

    pub fn sink_for<'a>(&'a self, tenant: &'a Tenant) -> &'a str {
        tenant
            .webhook_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.default_sink)
    }

    pub async fn relay(
        &self,
        tenant: &Tenant,
        identity: &VerifiedIdentity,
        event: WebhookEvent,
    ) -> Result<WebhookDelivery, BridgeError> {
        let payload = json!({
            "tenantId": tenant.tenant_id,
            "eventType": event.event_type,
            "eventData": event.event_data,
        });
        let body = serde_json::to_vec(&payload)
            .map_err(|e| BridgeError::Internal(format!("serialize webhook body: {e}")))?;
        let headers = self.signer.sign(tenant, identity, &body)?;
        let url = self.sink_for(tenant);

        let response = self
            .http_client
            .post(url)
            .headers(headers)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                self.audit
                    .webhook_relayed(&tenant.tenant_id, &event.event_type, false, None);
                BridgeError::DownstreamUnavailable(format!("webhook sink: {e}"))
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        self.audit.webhook_relayed(
            &tenant.tenant_id,
            &event.event_type,
            status.is_success(),
            Some(status.as_u16()),
        );

        Ok(WebhookDelivery {
            tenant_id: tenant.tenant_id.clone(),
            event_type: event.event_type,
            delivered: status.is_success(),
            status: status.as_u16(),
            response: body,
        })
    }
}
