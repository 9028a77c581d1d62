use axum::http::{HeaderMap, HeaderName};

/// Header the upstream authorization layer sets once it has authenticated the caller.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Resolves the caller's tenant before shared-secret verification.
///
/// The shared-secret scheme carries no tenant claim of its own, so the tenant must
/// come from whatever authenticated the session in front of this service.
pub trait TenantResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self, headers: &HeaderMap) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct HeaderTenantResolver {
    header: HeaderName,
}

impl HeaderTenantResolver {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for HeaderTenantResolver {
    fn default() -> Self {
        Self::new(HeaderName::from_static(TENANT_HEADER))
    }
}

impl TenantResolver for HeaderTenantResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}
