//! Authenticator collaborator contract.

use std::collections::HashSet;

use async_trait::async_trait;

/// Authenticated principal resolved from a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    subject: String,
    display_name: Option<String>,
    credential: String,
}

impl Identity {
    pub fn new(subject: impl Into<String>, credential: impl Into<String>) -> Self {
        Self { subject: subject.into(), display_name: None, credential: credential.into() }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Stable subject identifier assigned by the identity provider.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Raw credential the identity was resolved from.
    pub fn credential(&self) -> &str {
        &self.credential
    }
}

/// Identity-provider integration consumed by the pipeline.
///
/// The pipeline calls [`validate`](Authenticator::validate) once per request
/// carrying a credential and, on success,
/// [`permissions_for`](Authenticator::permissions_for) to resolve the
/// caller's capability set. Token cryptography and role-to-permission
/// mapping live behind this trait.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a credential to an identity, or `None` if it is invalid or
    /// expired.
    async fn validate(&self, credential: &str) -> Option<Identity>;

    /// Capability strings granted to the credential's principal.
    async fn permissions_for(&self, credential: &str) -> HashSet<String>;
}
