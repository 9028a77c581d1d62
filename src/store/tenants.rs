use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Client credentials issued to a tenant on install.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Per-tenant identity and secret material.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Tenant {
    pub tenant_id: String,
    pub region: Option<String>,
    pub credentials: ClientCredentials,
    /// Shared-secret scheme only.
    pub api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub instance_id: Option<String>,
}

impl Tenant {
    fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            ..Self::default()
        }
    }

    /// True iff tenant id, client id and client secret are all non-empty.
    pub fn is_complete(&self) -> bool {
        !self.tenant_id.is_empty()
            && !self.credentials.client_id.is_empty()
            && !self.credentials.client_secret.is_empty()
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("tenant_id", &self.tenant_id)
            .field("region", &self.region)
            .field("credentials", &self.credentials)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("webhook_url", &self.webhook_url)
            .field("instance_id", &self.instance_id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Registration metadata recorded when the platform registers the app.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub tenant_id: String,
    pub app_id: String,
    pub metadata: serde_json::Value,
    pub registered_at: DateTime<Utc>,
}

/// Lifecycle position of a tenant, derived from stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Unregistered,
    Registered,
    Installed,
    Uninstalled,
}

/// Tenant-partitioned credential store.
///
/// Backed by sharded maps, so writes for one tenant never take a lock another
/// tenant's reads or writes depend on. Same-tenant writes are last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct TenantStore {
    tenants: Arc<DashMap<String, Tenant>>,
    registrations: Arc<DashMap<String, Registration>>,
}

impl TenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` is the normal outcome for an unknown tenant.
    pub fn get(&self, tenant_id: &str) -> Option<Tenant> {
        self.tenants.get(tenant_id).map(|t| t.value().clone())
    }

    pub fn registration(&self, app_id: &str) -> Option<Registration> {
        self.registrations.get(app_id).map(|r| r.value().clone())
    }

    pub fn upsert_registration(&self, metadata: serde_json::Value, tenant_id: &str, app_id: &str) {
        self.registrations.insert(
            app_id.to_string(),
            Registration {
                tenant_id: tenant_id.to_string(),
                app_id: app_id.to_string(),
                metadata,
                registered_at: Utc::now(),
            },
        );
        self.tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Tenant::new(tenant_id));
        debug!(tenant_id = %tenant_id, app_id = %app_id, "registration stored");
    }

    pub fn upsert_account(&self, tenant_id: &str, region: &str, credentials: ClientCredentials) {
        let mut entry = self
            .tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Tenant::new(tenant_id));
        entry.region = Some(region.to_string()).filter(|r| !r.is_empty());
        entry.credentials = credentials;
        debug!(tenant_id = %tenant_id, region = %region, "account stored");
    }

    /// Updates an existing tenant only; returns false when the tenant is gone.
    pub fn upsert_webhook_url(&self, tenant_id: &str, url: &str) -> bool {
        match self.tenants.get_mut(tenant_id) {
            Some(mut entry) => {
                entry.webhook_url = Some(url.to_string());
                debug!(tenant_id = %tenant_id, webhook_url = %url, "webhook url stored");
                true
            }
            None => {
                debug!(tenant_id = %tenant_id, "webhook url dropped, tenant no longer stored");
                false
            }
        }
    }

    pub fn upsert_instance_id(&self, tenant_id: &str, instance_id: &str) {
        if let Some(mut entry) = self.tenants.get_mut(tenant_id) {
            entry.instance_id = Some(instance_id.to_string());
        }
    }

    /// Configuration save: only the fields provided are overwritten.
    pub fn save_configuration(
        &self,
        tenant_id: &str,
        api_key: Option<&str>,
        webhook_url: Option<&str>,
    ) {
        let mut entry = self
            .tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Tenant::new(tenant_id));
        if let Some(key) = api_key {
            entry.api_key = Some(key.to_string());
        }
        if let Some(url) = webhook_url {
            entry.webhook_url = Some(url.to_string());
        }
    }

    pub fn remove(&self, tenant_id: &str) -> Option<Tenant> {
        self.tenants.remove(tenant_id).map(|(_, tenant)| tenant)
    }

    /// Drops every tenant record and the registration of `app_id`. Other apps'
    /// registrations stay.
    pub fn remove_all(&self, app_id: &str) {
        self.tenants.clear();
        self.registrations.remove(app_id);
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn state_of(&self, tenant_id: &str, app_id: &str) -> LifecycleState {
        if self.registration(app_id).is_none() {
            return LifecycleState::Unregistered;
        }
        match self.get(tenant_id) {
            Some(tenant) if tenant.is_complete() => LifecycleState::Installed,
            Some(_) => LifecycleState::Registered,
            None => LifecycleState::Uninstalled,
        }
    }
}
