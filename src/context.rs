//! Per-request identity and correlation state.
//!
//! A [`RequestContext`] is owned by exactly one in-flight request. The
//! pipeline creates it when a request enters, threads a mutable borrow
//! through every stage, and drops it when the response leaves. Ownership is
//! the isolation mechanism: there is no process-wide slot holding "the
//! current user", so one request can never observe another's identity no
//! matter how the executor interleaves tasks across suspension points.

use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use crate::auth::Identity;

/// Contract violations on a single request's context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    /// `set_identity` was called again with a different subject.
    #[error("context already bound to subject `{existing}` (attempted rebind to `{attempted}`)")]
    IdentityConflict { existing: String, attempted: String },
}

/// Identity, permissions, and correlation id for one logical request.
#[derive(Debug)]
pub struct RequestContext {
    correlation_id: String,
    identity: Option<Identity>,
    permissions: HashSet<String>,
}

impl RequestContext {
    /// Begin a fresh, anonymous context with a generated correlation id.
    pub fn new() -> Self {
        Self::with_correlation_id(Uuid::new_v4().to_string())
    }

    /// Begin a context adopting an externally supplied correlation id.
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            identity: None,
            permissions: HashSet::new(),
        }
    }

    /// Opaque identifier naming this request across its full execution path.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn permissions(&self) -> &HashSet<String> {
        &self.permissions
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Bind the authenticated identity and its capability set.
    ///
    /// Rebinding the same subject refreshes the permission set; rebinding a
    /// different subject on one request is a contract violation.
    pub fn set_identity(
        &mut self,
        identity: Identity,
        permissions: HashSet<String>,
    ) -> Result<(), ContextError> {
        if let Some(existing) = &self.identity {
            if existing.subject() != identity.subject() {
                return Err(ContextError::IdentityConflict {
                    existing: existing.subject().to_string(),
                    attempted: identity.subject().to_string(),
                });
            }
        }
        self.identity = Some(identity);
        self.permissions = permissions;
        Ok(())
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_any_permission<'a>(&self, permissions: impl IntoIterator<Item = &'a str>) -> bool {
        permissions.into_iter().any(|p| self.permissions.contains(p))
    }

    pub fn has_all_permissions<'a>(&self, permissions: impl IntoIterator<Item = &'a str>) -> bool {
        permissions.into_iter().all(|p| self.permissions.contains(p))
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
