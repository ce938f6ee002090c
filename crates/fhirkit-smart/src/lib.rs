//! SMART on FHIR authorization (spec §4.8, C8): an authorization-code +
//! PKCE state machine, opaque token issuance and refresh, introspection,
//! and per-interaction scope checks. This crate simulates SMART App
//! Launch conformance for testing relying-party apps; its signing key is
//! fixed and public, so it is not a security boundary.

pub mod authorize;
pub mod error;
pub mod jwt;
pub mod pkce;
pub mod scopes;
pub mod store;
pub mod types;

pub use authorize::{always_allowed, is_authorized, required_permission};
pub use error::SmartError;
pub use scopes::{parse_scope_string, Permissions, ResourceScope, ScopeContext, ScopedResourceType, ScopeToken};
pub use store::SmartAuthManager;
pub use types::{AuthorizationInfo, IntrospectionResponse, RequestParameters, SmartTokenResponse};
