//! The cached authority decision service.
//!
//! Per decision the state machine is `uncomputed → cached-hit |
//! freshly-computed → returned`; no decision is ever pending across calls.
//! Misses resolve roles through the cached role lookup, run the injected
//! [`PolicyEngine`], and write the stamped decision to both cache tiers.
//!
//! ## Fail closed
//!
//! `check_authority` and `check_sap_authority` are infallible at their
//! signatures: any internal error (role resolution, evaluation, context
//! hashing, cache plumbing) becomes a deny decision carrying the failure in
//! `metadata.error`. Authorization errors must never fail open, and business
//! callers never see a raw error from these two entry points.
//!
//! ## Construction
//!
//! The service is an explicitly constructed instance over injected
//! collaborators — no global singleton — so tests run isolated instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures_util::future::join_all;
use serde_json::{Map, Value};

use portico_cache::{
    CacheKey, HybridCache, NS_AUTHORITY, SAP_AUTHORITY, USER_ROLES, authority_key, context_hash,
    sap_authority_key, user_data_key, user_scope_prefix,
};

use crate::context::{AuthorityContext, AuthorityDecision};
use crate::error::{AuthzError, AuthzResult};
use crate::policy::PolicyEngine;
use crate::roles::RoleSource;

/// Cached allow/deny decisions over an injected policy engine and role
/// source.
pub struct AuthorityService {
    cache: Arc<HybridCache>,
    roles: Arc<dyn RoleSource>,
    engine: Arc<dyn PolicyEngine>,
}

impl AuthorityService {
    pub fn new(
        cache: Arc<HybridCache>,
        roles: Arc<dyn RoleSource>,
        engine: Arc<dyn PolicyEngine>,
    ) -> Self {
        Self {
            cache,
            roles,
            engine,
        }
    }

    /// Decide whether the context's operation is permitted.
    ///
    /// Cache hits are returned with `metadata.cached = true`; fresh
    /// computations carry `cached = false` and an `executionTimeMs` stamp.
    pub async fn check_authority(&self, ctx: &AuthorityContext) -> AuthorityDecision {
        if ctx.user_id.is_empty() {
            return AuthorityDecision::deny("Authentication required");
        }

        let key = match self.general_key(ctx) {
            Ok(key) => key,
            Err(e) => return fail_closed(&e),
        };
        self.check_cached(&key, &portico_cache::AUTHORITY, ctx).await
    }

    /// SAP-scoped variant: folds the sold-to/ship-to qualifiers into the
    /// cache key and uses the shorter SAP TTL policy.
    pub async fn check_sap_authority(
        &self,
        user_id: &str,
        sap_resource: &str,
        operation: &str,
        sold_to_id: Option<&str>,
        ship_to_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> AuthorityDecision {
        if user_id.is_empty() {
            return AuthorityDecision::deny("Authentication required");
        }

        let mut ctx = AuthorityContext::new(user_id, sap_resource, operation);
        ctx.sold_to_id = sold_to_id.map(str::to_string);
        ctx.ship_to_id = ship_to_id.map(str::to_string);
        ctx.metadata = metadata;

        let key = sap_authority_key(
            NS_AUTHORITY,
            user_id,
            sap_resource,
            operation,
            sold_to_id,
            ship_to_id,
        );
        self.check_cached(&key, &SAP_AUTHORITY, &ctx).await
    }

    /// Check many contexts at once.
    ///
    /// Phase one is a cache-only sweep that never triggers evaluation;
    /// phase two evaluates all misses concurrently and writes the results
    /// back. The result map is keyed by the rendered cache key, so a context
    /// appearing twice collapses to one entry. Identical contexts submitted
    /// before any write lands may still each evaluate — the same caveat as
    /// single `get`s racing — which is an assumed optimization, not a
    /// guarantee.
    pub async fn check_batch_authority(
        &self,
        contexts: &[AuthorityContext],
    ) -> HashMap<String, AuthorityDecision> {
        let mut results: HashMap<String, AuthorityDecision> = HashMap::new();
        let mut misses: Vec<(CacheKey, &AuthorityContext)> = Vec::new();

        for ctx in contexts {
            let key = match self.general_key(ctx) {
                Ok(key) => key,
                Err(e) => {
                    // Unhashable context: deny it under a synthetic key so the
                    // caller still sees one decision per context.
                    let fallback = format!("{NS_AUTHORITY}:unhashable:{}", ctx.user_id);
                    results.insert(fallback, fail_closed(&e));
                    continue;
                }
            };
            if results.contains_key(key.as_str()) || misses.iter().any(|(k, _)| *k == key) {
                continue;
            }
            match self
                .cache
                .peek::<AuthorityDecision>(&key, &portico_cache::AUTHORITY)
                .await
            {
                Some(decision) => {
                    results.insert(key.as_str().to_string(), decision.mark_cached(true));
                }
                None => misses.push((key, ctx)),
            }
        }

        let evaluations = misses.iter().map(|(key, ctx)| async move {
            let decision = match self.evaluate_fresh(ctx).await {
                Ok(decision) => {
                    if let Err(e) = self
                        .cache
                        .insert(key, &decision, &portico_cache::AUTHORITY)
                        .await
                    {
                        tracing::warn!(key = %key, error = %e, "failed to cache batch decision");
                    }
                    decision
                }
                Err(e) => fail_closed(&e),
            };
            (key.as_str().to_string(), decision)
        });

        for (key, decision) in join_all(evaluations).await {
            results.insert(key, decision);
        }
        results
    }

    /// Cached role lookup. Misses delegate to the injected role source.
    ///
    /// # Errors
    ///
    /// Propagates role-source failures; unlike the check entry points there
    /// is no decision to fail into here.
    pub async fn get_user_roles(&self, user_id: &str) -> AuthzResult<Vec<String>> {
        let key = user_data_key(USER_ROLES.namespace, user_id, "roles", None);
        self.cache
            .get_with(&key, &USER_ROLES, || async {
                self.roles.roles_for(user_id).await
            })
            .await
            .map_err(AuthzError::from)
    }

    /// Drop every cached authority decision for one user (general and SAP
    /// alike; both nest the user id as the first key segment under the
    /// `authority` namespace). Returns the number of entries removed.
    pub async fn invalidate_user_authority(&self, user_id: &str) -> usize {
        let removed = self
            .cache
            .invalidate_prefix(&user_scope_prefix(NS_AUTHORITY, user_id))
            .await;
        tracing::info!(user_id = %user_id, removed = removed, "invalidated user authority cache");
        removed
    }

    /// Flush the entire authority namespace.
    pub async fn invalidate_all_authority(&self) -> usize {
        let removed = self.cache.invalidate_namespace(NS_AUTHORITY).await;
        tracing::info!(removed = removed, "invalidated all authority caches");
        removed
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn general_key(&self, ctx: &AuthorityContext) -> AuthzResult<CacheKey> {
        let hash = context_hash(&ctx.fingerprint())?;
        Ok(authority_key(
            NS_AUTHORITY,
            &ctx.user_id,
            &ctx.resource,
            &ctx.operation,
            &hash,
        ))
    }

    async fn check_cached(
        &self,
        key: &CacheKey,
        policy: &portico_cache::CachePolicy,
        ctx: &AuthorityContext,
    ) -> AuthorityDecision {
        let computed = AtomicBool::new(false);
        let result = self
            .cache
            .get_with::<AuthorityDecision, _, _, _>(key, policy, || async {
                computed.store(true, Ordering::SeqCst);
                self.evaluate_fresh(ctx).await
            })
            .await;

        match result {
            Ok(decision) => decision.mark_cached(!computed.load(Ordering::SeqCst)),
            Err(e) => fail_closed(&e),
        }
    }

    async fn evaluate_fresh(&self, ctx: &AuthorityContext) -> AuthzResult<AuthorityDecision> {
        let started = Instant::now();

        let roles = match &ctx.user_roles {
            Some(roles) => roles.clone(),
            None => self.get_user_roles(&ctx.user_id).await?,
        };

        let verdict = self.engine.evaluate(ctx, &roles)?;
        let decision = if verdict.allowed {
            AuthorityDecision::allow(verdict.reason)
        } else {
            AuthorityDecision::deny(verdict.reason)
        };

        Ok(decision
            .with_metadata(
                "executionTimeMs",
                Value::from(started.elapsed().as_millis() as u64),
            )
            .mark_cached(false))
    }
}

/// Convert an internal failure into a deny decision. Never allow on error.
fn fail_closed(error: &dyn std::fmt::Display) -> AuthorityDecision {
    let message = error.to_string();
    tracing::warn!(error = %message, "authority check failed, denying");
    AuthorityDecision::deny(format!("Authority check failed: {message}"))
        .with_metadata("error", Value::String(message))
        .mark_cached(false)
}
