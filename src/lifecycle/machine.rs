use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Rejection};
use crate::lifecycle::{AppRef, Installed, LifecycleEvent, Registered};
use crate::security::audit_log::AuditLogger;
use crate::security::verifier::VerifiedIdentity;
use crate::store::{ClientCredentials, LifecycleState, Registration, TenantStore};
use crate::transport::relay::{ProvisioningClient, RelayOutcome};

/// What a lifecycle transition did, reported back to the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub event_type: String,
    pub tenant_id: String,
    pub app_id: String,
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<RelayOutcome>,
    /// UNINSTALLED only: whether the provisioning API acknowledged the teardown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprovisioned: Option<bool>,
}

impl TransitionOutcome {
    fn new(event: &LifecycleEvent, state: LifecycleState) -> Self {
        Self {
            event_type: event.event_type().to_string(),
            tenant_id: event.tenant_id().to_string(),
            app_id: event.app_id().to_string(),
            state,
            provisioning: None,
            deprovisioned: None,
        }
    }
}

/// Applies verified lifecycle events to the credential store.
#[derive(Debug, Clone)]
pub struct LifecycleMachine {
    store: TenantStore,
    provisioning: ProvisioningClient,
    audit: AuditLogger,
}

impl LifecycleMachine {
    pub fn new(store: TenantStore, provisioning: ProvisioningClient) -> Self {
        Self {
            store,
            provisioning,
            audit: AuditLogger::new(),
        }
    }

    /// The identity must come from a successful `SignatureVerifier::verify`; every
    /// identifier check runs before the store is touched.
    pub async fn handle(
        &self,
        event: LifecycleEvent,
        identity: &VerifiedIdentity,
    ) -> Result<TransitionOutcome, BridgeError> {
        if event.tenant_id().is_empty() || event.app_id().is_empty() {
            return Err(BridgeError::InvalidEvent(
                "tenantId and appId are required".to_string(),
            ));
        }
        if identity.tenant_id != event.tenant_id() {
            return Err(BridgeError::Validation(Rejection::TenantMismatch));
        }

        let outcome = match &event {
            LifecycleEvent::Registered(e) => self.on_registered(&event, e),
            LifecycleEvent::Installed(e) => self.on_installed(&event, e, identity).await,
            LifecycleEvent::Unregistered(e) => self.on_unregistered(&event, e),
            LifecycleEvent::Uninstalled(e) => self.on_uninstalled(&event, e, identity).await,
        }?;

        self.audit
            .lifecycle_transition(event.tenant_id(), event.app_id(), event.event_type());
        Ok(outcome)
    }

    /// Registration for `app_id` owned by `tenant_id`.
    fn owned_registration(&self, tenant_id: &str, app_id: &str) -> Result<Registration, BridgeError> {
        match self.store.registration(app_id) {
            Some(reg) if reg.tenant_id == tenant_id => Ok(reg),
            Some(_) => Err(BridgeError::InvalidEvent(format!(
                "app {app_id} is registered to a different tenant"
            ))),
            None => Err(BridgeError::InvalidEvent(format!("app {app_id} is not registered"))),
        }
    }

    fn on_registered(&self, event: &LifecycleEvent, e: &Registered) -> Result<TransitionOutcome, BridgeError> {
        if let Some(existing) = self.store.registration(&e.app_id) {
            if existing.tenant_id != e.tenant_id {
                return Err(BridgeError::InvalidEvent(format!(
                    "app {} is registered to a different tenant",
                    e.app_id
                )));
            }
        }
        self.store
            .upsert_registration(e.metadata.clone(), &e.tenant_id, &e.app_id);
        Ok(TransitionOutcome::new(event, LifecycleState::Registered))
    }

    async fn on_installed(
        &self,
        event: &LifecycleEvent,
        e: &Installed,
        identity: &VerifiedIdentity,
    ) -> Result<TransitionOutcome, BridgeError> {
        self.owned_registration(&e.tenant_id, &e.app_id)?;

        self.store.upsert_account(
            &e.tenant_id,
            &e.region,
            ClientCredentials {
                client_id: e.client_id.clone(),
                client_secret: e.client_secret.clone(),
            },
        );
        let tenant = self
            .store
            .get(&e.tenant_id)
            .ok_or_else(|| BridgeError::UnknownTenant(e.tenant_id.clone()))?;
        if !tenant.is_complete() {
            warn!(tenant_id = %e.tenant_id, "install without complete client credentials");
            return Err(BridgeError::Configuration(format!(
                "incomplete client credentials for tenant {}",
                e.tenant_id
            )));
        }

        let mut metadata = Map::new();
        metadata.insert("appId".to_string(), json!(e.app_id));
        if !e.region.is_empty() {
            metadata.insert("region".to_string(), json!(e.region));
        }

        match self
            .provisioning
            .send(&tenant, identity, event.event_type(), metadata)
            .await?
        {
            accepted @ RelayOutcome::Accepted { .. } => {
                info!(tenant_id = %e.tenant_id, app_id = %e.app_id, "tenant provisioned");
                let mut outcome = TransitionOutcome::new(event, LifecycleState::Installed);
                outcome.provisioning = Some(accepted);
                Ok(outcome)
            }
            RelayOutcome::Rejected { error } => Err(BridgeError::ProvisioningRejected(error)),
        }
    }

    fn on_unregistered(&self, event: &LifecycleEvent, e: &AppRef) -> Result<TransitionOutcome, BridgeError> {
        self.owned_registration(&e.tenant_id, &e.app_id)?;
        let removed = self.store.len();
        self.store.remove_all(&e.app_id);
        info!(app_id = %e.app_id, removed_tenants = removed, "app unregistered, all tenant records dropped");
        Ok(TransitionOutcome::new(event, LifecycleState::Unregistered))
    }

    async fn on_uninstalled(
        &self,
        event: &LifecycleEvent,
        e: &AppRef,
        identity: &VerifiedIdentity,
    ) -> Result<TransitionOutcome, BridgeError> {
        self.owned_registration(&e.tenant_id, &e.app_id)?;
        let tenant = self
            .store
            .get(&e.tenant_id)
            .ok_or_else(|| BridgeError::UnknownTenant(e.tenant_id.clone()))?;

        let deprovisioned = if tenant.is_complete() {
            let mut metadata = Map::new();
            metadata.insert("appId".to_string(), Value::String(e.app_id.clone()));
            match self
                .provisioning
                .send(&tenant, identity, event.event_type(), metadata)
                .await
            {
                Ok(RelayOutcome::Accepted { .. }) => true,
                Ok(RelayOutcome::Rejected { error }) => {
                    self.audit.deprovision_failed(&e.tenant_id, &error);
                    false
                }
                Err(err) => {
                    self.audit.deprovision_failed(&e.tenant_id, &err.to_string());
                    false
                }
            }
        } else {
            self.audit
                .deprovision_failed(&e.tenant_id, "tenant has no complete credentials");
            false
        };

        self.store.remove(&e.tenant_id);
        debug!(tenant_id = %e.tenant_id, deprovisioned, "tenant credentials removed");

        let mut outcome = TransitionOutcome::new(event, LifecycleState::Uninstalled);
        outcome.deprovisioned = Some(deprovisioned);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::ProvisioningConfig;
    use crate::security::verifier::VerifiedScheme;
    use mockito::{Matcher, Server};
    use std::collections::HashMap;

    fn machine(store: &TenantStore, provisioning_url: &str) -> LifecycleMachine {
        let config = ProvisioningConfig {
            base_url: provisioning_url.to_string(),
            path: "/api/v1/provisioning".to_string(),
            regions: HashMap::new(),
        };
        let client = ProvisioningClient::new(reqwest::Client::new(), config, store.clone());
        LifecycleMachine::new(store.clone(), client)
    }

    fn identity(tenant_id: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            tenant_id: tenant_id.to_string(),
            scheme: VerifiedScheme::SharedSecret,
        }
    }

    fn registered(tenant_id: &str) -> LifecycleEvent {
        LifecycleEvent::Registered(Registered {
            tenant_id: tenant_id.to_string(),
            app_id: "app-1".to_string(),
            metadata: json!({"plan": "pro"}),
        })
    }

    fn installed(client_secret: &str) -> LifecycleEvent {
        LifecycleEvent::Installed(Installed {
            tenant_id: "t-1".to_string(),
            app_id: "app-1".to_string(),
            region: "eu".to_string(),
            client_id: "cid".to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    fn app_ref(tenant_id: &str) -> AppRef {
        AppRef {
            tenant_id: tenant_id.to_string(),
            app_id: "app-1".to_string(),
        }
    }

    fn seeded_store() -> TenantStore {
        let store = TenantStore::new();
        store.save_configuration("t-1", Some("key-1"), None);
        store
    }

    #[tokio::test]
    async fn test_registered_stores_registration_without_network() {
        let store = seeded_store();
        let machine = machine(&store, "http://127.0.0.1:9");

        let outcome = machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();
        assert_eq!(outcome.state, LifecycleState::Registered);
        let reg = store.registration("app-1").unwrap();
        assert_eq!(reg.tenant_id, "t-1");
        assert_eq!(reg.metadata, json!({"plan": "pro"}));
        assert_eq!(store.state_of("t-1", "app-1"), LifecycleState::Registered);
    }

    #[tokio::test]
    async fn test_installed_provisions_once_and_stores_webhook_url() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/provisioning")
            .match_body(Matcher::PartialJson(json!({
                "tenantId": "t-1",
                "clientCredentials": {"clientId": "cid", "clientSecret": "sec"},
                "eventType": "INSTALLED",
                "appId": "app-1"
            })))
            .with_status(200)
            .with_body(r#"{"success":true,"instanceId":"i-1","webhookUrl":"https://hooks.example.com/t-1"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = seeded_store();
        let machine = machine(&store, &server.url());
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();

        let outcome = machine.handle(installed("sec"), &identity("t-1")).await.unwrap();
        mock.assert_async().await;
        assert_eq!(outcome.state, LifecycleState::Installed);
        assert_eq!(
            store.get("t-1").unwrap().webhook_url.as_deref(),
            Some("https://hooks.example.com/t-1")
        );
        assert_eq!(store.state_of("t-1", "app-1"), LifecycleState::Installed);
    }

    #[tokio::test]
    async fn test_installed_with_incomplete_credentials_does_not_call_out() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/provisioning")
            .expect(0)
            .create_async()
            .await;

        let store = seeded_store();
        let machine = machine(&store, &server.url());
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();

        let result = machine.handle(installed(""), &identity("t-1")).await;
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_installed_without_registration_rejected_before_mutation() {
        let store = seeded_store();
        let machine = machine(&store, "http://127.0.0.1:9");

        let result = machine.handle(installed("sec"), &identity("t-1")).await;
        assert!(matches!(result, Err(BridgeError::InvalidEvent(_))));
        assert!(store.get("t-1").unwrap().credentials.client_id.is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_rejection_surfaces() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/provisioning")
            .with_status(200)
            .with_body(r#"{"success":false,"error":"region closed"}"#)
            .create_async()
            .await;

        let store = seeded_store();
        let machine = machine(&store, &server.url());
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();

        let result = machine.handle(installed("sec"), &identity("t-1")).await;
        assert!(matches!(result, Err(BridgeError::ProvisioningRejected(ref e)) if e == "region closed"));
    }

    #[tokio::test]
    async fn test_identity_must_match_event_tenant() {
        let store = seeded_store();
        let machine = machine(&store, "http://127.0.0.1:9");

        let result = machine.handle(registered("t-1"), &identity("t-2")).await;
        assert!(matches!(
            result,
            Err(BridgeError::Validation(Rejection::TenantMismatch))
        ));
        assert!(store.registration("app-1").is_none());
    }

    #[tokio::test]
    async fn test_registration_cannot_be_taken_over() {
        let store = seeded_store();
        let machine = machine(&store, "http://127.0.0.1:9");
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();

        let result = machine.handle(registered("t-2"), &identity("t-2")).await;
        assert!(matches!(result, Err(BridgeError::InvalidEvent(_))));
        assert_eq!(store.registration("app-1").unwrap().tenant_id, "t-1");
    }

    #[tokio::test]
    async fn test_uninstalled_removes_tenant_even_when_provisioning_down() {
        let mut server = Server::new_async().await;
        let _install = server
            .mock("POST", "/api/v1/provisioning")
            .match_body(Matcher::PartialJson(json!({"eventType": "INSTALLED"})))
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;
        let _uninstall = server
            .mock("POST", "/api/v1/provisioning")
            .match_body(Matcher::PartialJson(json!({"eventType": "UNINSTALLED"})))
            .with_status(503)
            .create_async()
            .await;

        let store = seeded_store();
        let machine = machine(&store, &server.url());
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();
        machine.handle(installed("sec"), &identity("t-1")).await.unwrap();

        let outcome = machine
            .handle(LifecycleEvent::Uninstalled(app_ref("t-1")), &identity("t-1"))
            .await
            .unwrap();
        assert_eq!(outcome.deprovisioned, Some(false));
        assert!(store.get("t-1").is_none());
        assert_eq!(store.state_of("t-1", "app-1"), LifecycleState::Uninstalled);
    }

    #[tokio::test]
    async fn test_uninstalled_reports_acknowledged_teardown() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/provisioning")
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .expect(2)
            .create_async()
            .await;

        let store = seeded_store();
        let machine = machine(&store, &server.url());
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();
        machine.handle(installed("sec"), &identity("t-1")).await.unwrap();

        let outcome = machine
            .handle(LifecycleEvent::Uninstalled(app_ref("t-1")), &identity("t-1"))
            .await
            .unwrap();
        assert_eq!(outcome.deprovisioned, Some(true));
        assert!(store.get("t-1").is_none());
    }

    #[tokio::test]
    async fn test_unregistered_drops_everything() {
        let store = seeded_store();
        store.save_configuration("t-2", Some("key-2"), None);
        let machine = machine(&store, "http://127.0.0.1:9");
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();

        let outcome = machine
            .handle(LifecycleEvent::Unregistered(app_ref("t-1")), &identity("t-1"))
            .await
            .unwrap();
        assert_eq!(outcome.state, LifecycleState::Unregistered);
        assert!(store.is_empty());
        assert!(store.registration("app-1").is_none());
    }

    #[tokio::test]
    async fn test_unregistered_keeps_other_apps_registered() {
        let store = seeded_store();
        store.save_configuration("t-2", Some("key-2"), None);
        let machine = machine(&store, "http://127.0.0.1:9");
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();
        let other_app = LifecycleEvent::Registered(Registered {
            tenant_id: "t-2".to_string(),
            app_id: "app-2".to_string(),
            metadata: json!({}),
        });
        machine.handle(other_app, &identity("t-2")).await.unwrap();

        machine
            .handle(LifecycleEvent::Unregistered(app_ref("t-1")), &identity("t-1"))
            .await
            .unwrap();
        assert!(store.registration("app-1").is_none());
        assert_eq!(store.registration("app-2").unwrap().tenant_id, "t-2");
    }

    #[tokio::test]
    async fn test_unregistered_by_non_registrant_rejected() {
        let store = seeded_store();
        store.save_configuration("t-2", Some("key-2"), None);
        let machine = machine(&store, "http://127.0.0.1:9");
        machine.handle(registered("t-1"), &identity("t-1")).await.unwrap();

        let result = machine
            .handle(LifecycleEvent::Unregistered(app_ref("t-2")), &identity("t-2"))
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidEvent(_))));
        assert_eq!(store.len(), 2);
    }
}
