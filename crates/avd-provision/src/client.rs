//! Narrow interface to the cloud control plane
//!
//! Authentication is assumed to be established before invocation; the
//! provisioner never manages credentials.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::resource::{ResourceHandle, ResourceSpec, SpecId};

/// Failure reported by a control-plane call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ClientError(pub String);

impl ClientError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Resolved identifiers of the dependencies a spec declared, keyed by their
/// well-known id
pub type DependencyHandles = BTreeMap<SpecId, ResourceHandle>;

/// Control-plane operations the provisioner needs.
///
/// One existence query and one creation call per resource kind, dispatched on
/// the spec's kind by the implementation, plus provider registration.
pub trait CloudClient {
    /// Query the live environment for a resource matching the spec's kind,
    /// name, and scope. Exact name match only.
    fn find(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ClientError>;

    /// Create the resource described by the spec. `deps` carries the resolved
    /// handles of every spec listed in `spec.depends_on`.
    fn create(
        &self,
        spec: &ResourceSpec,
        deps: &DependencyHandles,
    ) -> Result<ResourceHandle, ClientError>;

    /// Whether a resource provider namespace is registered on the
    /// subscription
    fn provider_registered(&self, namespace: &str) -> Result<bool, ClientError>;

    /// Register a resource provider namespace
    fn register_provider(&self, namespace: &str) -> Result<(), ClientError>;
}
