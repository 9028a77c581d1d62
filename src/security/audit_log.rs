use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn signature_accepted(&self, tenant_id: &str, scheme: &str) {
        info!(target: "audit", event = "signature_accepted", tenant_id, scheme);
    }

    pub fn signature_rejected(&self, tenant_id: Option<&str>, reason: &str) {
        warn!(target: "audit", event = "signature_rejected", tenant_id = tenant_id.unwrap_or(""), reason);
    }

    pub fn replay_detected(&self, tenant_id: &str) {
        warn!(target: "audit", event = "replay_detected", tenant_id);
    }

    pub fn lifecycle_transition(&self, tenant_id: &str, app_id: &str, event_type: &str) {
        info!(target: "audit", event = "lifecycle_transition", tenant_id, app_id, event_type);
    }

    pub fn provisioning_result(&self, tenant_id: &str, event_type: &str, success: bool) {
        info!(target: "audit", event = "provisioning_result", tenant_id, event_type, success);
    }

    pub fn deprovision_failed(&self, tenant_id: &str, reason: &str) {
        warn!(target: "audit", event = "deprovision_failed", tenant_id, reason);
    }

    pub fn webhook_relayed(&self, tenant_id: &str, event_type: &str, delivered: bool, status: Option<u16>) {
        info!(
            target: "audit",
            event = "webhook_relayed",
            tenant_id,
            event_type,
            delivered,
            status = status.unwrap_or(0)
        );
    }
}
