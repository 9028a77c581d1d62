pub mod tenants;

pub use tenants::{ClientCredentials, LifecycleState, Registration, Tenant, TenantStore};
