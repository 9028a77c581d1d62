pub mod machine;

pub use machine::{LifecycleMachine, TransitionOutcome};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub tenant_id: String,
    pub app_id: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Missing credentials deserialize as empty strings so the machine can report them
/// as a configuration problem instead of a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installed {
    pub tenant_id: String,
    pub app_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRef {
    pub tenant_id: String,
    pub app_id: String,
}

/// Inbound lifecycle notification, discriminated by `eventType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEvent {
    Registered(Registered),
    Installed(Installed),
    Unregistered(AppRef),
    Uninstalled(AppRef),
}

impl LifecycleEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(body).map_err(|e| BridgeError::InvalidEvent(e.to_string()))
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::Registered(_) => "REGISTERED",
            LifecycleEvent::Installed(_) => "INSTALLED",
            LifecycleEvent::Unregistered(_) => "UNREGISTERED",
            LifecycleEvent::Uninstalled(_) => "UNINSTALLED",
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            LifecycleEvent::Registered(e) => &e.tenant_id,
            LifecycleEvent::Installed(e) => &e.tenant_id,
            LifecycleEvent::Unregistered(e) | LifecycleEvent::Uninstalled(e) => &e.tenant_id,
        }
    }

    pub fn app_id(&self) -> &str {
        match self {
            LifecycleEvent::Registered(e) => &e.app_id,
            LifecycleEvent::Installed(e) => &e.app_id,
            LifecycleEvent::Unregistered(e) | LifecycleEvent::Uninstalled(e) => &e.app_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_each_event_kind() {
        let registered = LifecycleEvent::from_slice(
            br#"{"eventType":"REGISTERED","tenantId":"t-1","appId":"app-1","metadata":{"plan":"pro"}}"#,
        )
        .unwrap();
        assert_eq!(
            registered,
            LifecycleEvent::Registered(Registered {
                tenant_id: "t-1".to_string(),
                app_id: "app-1".to_string(),
                metadata: json!({"plan": "pro"}),
            })
        );

        let installed = LifecycleEvent::from_slice(
            br#"{"eventType":"INSTALLED","tenantId":"t-1","appId":"app-1","region":"eu","clientId":"cid","clientSecret":"sec"}"#,
        )
        .unwrap();
        assert_eq!(installed.event_type(), "INSTALLED");
        assert_eq!(installed.tenant_id(), "t-1");

        let uninstalled = LifecycleEvent::from_slice(
            br#"{"eventType":"UNINSTALLED","tenantId":"t-1","appId":"app-1"}"#,
        )
        .unwrap();
        assert_eq!(uninstalled.app_id(), "app-1");
    }

    #[test]
    fn test_missing_credentials_parse_as_empty() {
        let event = LifecycleEvent::from_slice(
            br#"{"eventType":"INSTALLED","tenantId":"t-1","appId":"app-1"}"#,
        )
        .unwrap();
        match event {
            LifecycleEvent::Installed(e) => {
                assert!(e.client_id.is_empty());
                assert!(e.client_secret.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_is_invalid() {
        let result = LifecycleEvent::from_slice(br#"{"eventType":"UPGRADED","tenantId":"t-1","appId":"a"}"#);
        assert!(matches!(result, Err(BridgeError::InvalidEvent(_))));

        let result = LifecycleEvent::from_slice(br#"{"tenantId":"t-1","appId":"a"}"#);
        assert!(matches!(result, Err(BridgeError::InvalidEvent(_))));
    }
}
