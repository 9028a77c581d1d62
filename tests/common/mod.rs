#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose, Engine};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use platform_bridge::agent::config::{Config, TenantSeed};
use platform_bridge::comms::local_api::{create_router, AppState};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tower::ServiceExt; // for Router::oneshot
use uuid::Uuid;

pub const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/platform_key.pem");
pub const TEST_N: &str = "p1bGXG1ocE_97wqkIRrEy1Wk6-EcPtA5vlgBoSXFE6KuzCIeYu4u7B0Q8fMl9gzp21Dy7DVCMwrfPNRheTnny2Ma-foYELvQpTEB1aPatyw1Y33_RLhdcW9vlg6vCAVw3BIjVBTkRHmGQWeeGIleZqW1NHsns5jkde1x-CB-9qVSxtrpwSdsaRt780MYQ-esZTxgIH6Fjuqmr9KiPn_UIf68nDU3eedmoHcLfaZC-WEkbFt3XUfqS9ZTEDzi_t1VB_PsZmuoxatyiZUf8sTm1PABYqkkMszyocafzlFJN_Jy35vP0UpBt4eV5HEMLPtQYkucei3vhnKROUwX8qhSkQ";

pub fn jwks_body() -> String {
    json!({"keys": [{"kty": "RSA", "kid": "k1", "use": "sig", "alg": "RS256", "n": TEST_N, "e": "AQAB"}]})
        .to_string()
}

pub fn seed(tenant_id: &str, api_key: Option<&str>, webhook_url: Option<&str>) -> TenantSeed {
    TenantSeed {
        tenant_id: tenant_id.to_string(),
        api_key: api_key.map(str::to_string),
        webhook_url: webhook_url.map(str::to_string),
    }
}

/// App state plus router, so tests can inspect the store after a request.
pub fn app(config: Config) -> (Arc<AppState>, Router) {
    let state = Arc::new(AppState::new(Arc::new(config)).unwrap());
    let router = create_router(state.clone());
    (state, router)
}

pub fn platform_token(tenant_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    sign_claims(&json!({"iat": now, "exp": now + 300, "tenantId": tenant_id}))
}

pub fn sign_claims(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("k1".to_string());
    let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

/// Same header and signature, different claims.
pub fn tamper_claims(token: &str, claims: &Value) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.{}", parts[0], payload, parts[2])
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `body ‖ timestamp ‖ nonce`, base64 encoded.
pub fn hmac_b64(key: &str, body: &[u8], ts: i64, nonce: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
    mac.update(body);
    mac.update(ts.to_string().as_bytes());
    mac.update(nonce.as_bytes());
    general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

pub fn hmac_request(path: &str, tenant_id: &str, key: &str, body: &Value, ts: i64) -> Request<Body> {
    let body = body.to_string();
    let nonce = Uuid::new_v4().simple().to_string();
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-tenant-id", tenant_id)
        .header("X-Signature", hmac_b64(key, body.as_bytes(), ts, &nonce))
        .header("X-Signature-Timestamp", ts.to_string())
        .header("X-Signature-Nonce", nonce)
        .body(Body::from(body))
        .unwrap()
}

pub fn signed_post(path: &str, tenant_id: &str, key: &str, body: &Value) -> Request<Body> {
    hmac_request(path, tenant_id, key, body, chrono::Utc::now().timestamp())
}

pub fn token_post(path: &str, token: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("X-Platform-Token", token)
        .body(Body::from(body.to_string()))
        .unwrap()
}
