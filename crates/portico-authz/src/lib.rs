//! Authorization for Portico edge services.
//!
//! Two code paths share one policy seam:
//!
//! - [`AuthorityService`]: cached decisions (single, batched, SAP-scoped)
//!   over the Portico hybrid cache, fail-closed at its boundary. Governs
//!   ERP-scoped authorization.
//! - [`check_request_access`]: the stateless edge helper for coarse
//!   role-based CRUD authorization on catalog/content resources.
//!
//! Both evaluate the same [`RoleTablePolicy`] by default; callers choose a
//! path per endpoint, explicitly.

pub mod context;
pub mod edge;
pub mod error;
pub mod policy;
pub mod roles;
pub mod service;

pub use context::{AuthorityContext, AuthorityDecision};
pub use edge::{AccessDecision, AccessRequest, check_request_access};
pub use error::{AuthzError, AuthzResult};
pub use policy::{PolicyEngine, RoleTablePolicy, Verdict, role_table_verdict};
pub use roles::{ROLE_ADMIN, ROLE_CONTENT_ADMIN, ROLE_CUSTOMER, RoleSource};
pub use service::AuthorityService;
