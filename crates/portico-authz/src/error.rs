use thiserror::Error;

/// Errors raised while computing authority decisions.
///
/// Note that `check_authority`/`check_sap_authority` never surface these to
/// their callers: they are converted to deny decisions at the service
/// boundary (fail closed). They do surface from `get_user_roles` and the
/// invalidation operations, where there is no decision to fail into.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The injected role source failed.
    #[error("role resolution failed: {0}")]
    RoleResolution(String),

    /// Policy evaluation failed.
    #[error("policy evaluation failed: {0}")]
    Evaluation(String),

    /// A context could not be hashed into a cache key.
    #[error("context hashing failed: {0}")]
    ContextHash(#[from] serde_json::Error),

    /// The underlying cache store failed.
    #[error(transparent)]
    Cache(#[from] portico_cache::CacheError),
}

impl AuthzError {
    pub fn role_resolution(msg: impl Into<String>) -> Self {
        Self::RoleResolution(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }
}

/// Result alias used across the crate.
pub type AuthzResult<T> = Result<T, AuthzError>;
