use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{any, get, post},
    Json, Router,
};
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::agent::config::Config;
use crate::error::{BridgeError, Rejection};
use crate::lifecycle::{LifecycleEvent, LifecycleMachine, TransitionOutcome};
use crate::security::auth::{HeaderTenantResolver, TenantResolver};
use crate::security::jwks::KeySetClient;
use crate::security::token::TokenVerifier;
use crate::security::verifier::{Credential, SignatureVerifier, SignedEnvelope};
use crate::store::TenantStore;
use crate::transport::proxy::{ProxyForwarder, ProxyResponse};
use crate::transport::relay::{ProvisioningClient, WebhookRelay};
use crate::transport::WebhookEvent;

type SharedState = Arc<AppState>;

/// Service objects built once at start-up and shared by every request.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: TenantStore,
    pub verifier: SignatureVerifier,
    pub lifecycle: LifecycleMachine,
    pub webhooks: WebhookRelay,
    pub proxy: ProxyForwarder,
    pub tenant_resolver: Arc<dyn TenantResolver>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("building HTTP client")?;

        let store = TenantStore::new();
        for seed in &config.tenants {
            store.save_configuration(
                &seed.tenant_id,
                seed.api_key.as_deref(),
                seed.webhook_url.as_deref(),
            );
        }
        debug!(tenants = store.len(), "seeded tenant store");

        let keys = KeySetClient::new(
            config.platform.jwks_url.clone(),
            http_client.clone(),
            config.key_cache_ttl(),
        );
        let tokens = TokenVerifier::new(
            keys,
            config.platform.issuer.clone(),
            config.platform.audience.clone(),
            config.platform.leeway_secs,
        );
        let mut verifier =
            SignatureVerifier::new(store.clone(), tokens, config.signature.max_skew_secs);
        if config.signature.reject_replayed_nonces {
            verifier = verifier.with_nonce_guard();
        }

        let provisioning =
            ProvisioningClient::new(http_client.clone(), config.provisioning.clone(), store.clone());
        let downstream = &config.downstream;
        let default_sink = format!(
            "{}{}",
            downstream.base_url.trim_end_matches('/'),
            downstream.webhook_path
        );

        Ok(Self {
            lifecycle: LifecycleMachine::new(store.clone(), provisioning),
            webhooks: WebhookRelay::new(http_client.clone(), default_sink),
            proxy: ProxyForwarder::new(
                http_client,
                downstream.base_url.clone(),
                downstream.default_extension.clone(),
            ),
            verifier,
            store,
            tenant_resolver: Arc::new(HeaderTenantResolver::default()),
            config,
        })
    }

    pub fn with_tenant_resolver(mut self, resolver: Arc<dyn TenantResolver>) -> Self {
        self.tenant_resolver = resolver;
        self
    }
}

// Health check
async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "tenants": state.store.len(),
    }))
}

async fn lifecycle_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TransitionOutcome>, BridgeError> {
    let envelope = SignedEnvelope::from_request(&headers, body)?;
    let claimed = state.tenant_resolver.resolve(&headers);
    let identity = state.verifier.verify(&envelope, claimed.as_deref()).await?;

    let event = LifecycleEvent::from_slice(&envelope.payload)?;
    debug!(event_type = event.event_type(), tenant_id = %identity.tenant_id, "lifecycle event verified");
    let outcome = state.lifecycle.handle(event, &identity).await?;
    Ok(Json(outcome))
}

async fn webhook_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, BridgeError> {
    let envelope = SignedEnvelope::from_request(&headers, body)?;
    if !matches!(envelope.credential, Credential::PublicKey { .. }) {
        return Err(Rejection::SchemeNotAccepted.into());
    }
    let claimed = state.tenant_resolver.resolve(&headers);
    let identity = state.verifier.verify(&envelope, claimed.as_deref()).await?;

    let event: WebhookEvent = serde_json::from_slice(&envelope.payload)
        .map_err(|e| BridgeError::BadRequest(format!("invalid webhook body: {e}")))?;
    let tenant = state
        .store
        .get(&identity.tenant_id)
        .ok_or_else(|| BridgeError::UnknownTenant(identity.tenant_id.clone()))?;

    let delivery = state.webhooks.relay(&tenant, &identity, event).await?;
    let status = if delivery.delivered {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(delivery)))
}

async fn proxy_handler(
    State(state): State<SharedState>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ProxyResponse, BridgeError> {
    state
        .proxy
        .forward(method, &path, query.as_deref(), &headers, body)
        .await
}

pub fn create_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/v1/lifecycle", post(lifecycle_handler))
        .route("/api/v1/webhooks", post(webhook_handler));

    if state.config.features.proxy_enabled {
        router = router.route("/proxy/{*path}", any(proxy_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

pub async fn serve(config: Config, port: u16) -> Result<()> {
    let cfg = Arc::new(config);
    let state = Arc::new(AppState::new(cfg)?);
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("bridge listening on {}", addr);
    axum::serve(listener, app).into_future().await?;
    Ok(())
}
