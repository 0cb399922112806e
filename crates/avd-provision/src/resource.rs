//! Resource model for provisionable units

use std::fmt;

use serde::Serialize;

/// Kind of cloud resource a spec provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    ResourceGroup,
    ManagedIdentity,
    RoleDefinition,
    RoleAssignment,
    Gallery,
    GalleryImageDefinition,
}

impl ResourceKind {
    /// Kebab-case label, used in narration and summaries
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResourceGroup => "resource-group",
            Self::ManagedIdentity => "managed-identity",
            Self::RoleDefinition => "role-definition",
            Self::RoleAssignment => "role-assignment",
            Self::Gallery => "gallery",
            Self::GalleryImageDefinition => "gallery-image-definition",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known identity of a provisionable unit within a single run.
///
/// Keys the result map so dependents can look up resolved identifiers
/// explicitly instead of through shared mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecId {
    ResourceGroup,
    Identity,
    ImageRoleDefinition,
    ImageRoleAssignment,
    NetworkRoleDefinition,
    NetworkRoleAssignment,
    Gallery,
    ImageDefinition,
}

impl SpecId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResourceGroup => "resource-group",
            Self::Identity => "identity",
            Self::ImageRoleDefinition => "image-role-definition",
            Self::ImageRoleAssignment => "image-role-assignment",
            Self::NetworkRoleDefinition => "network-role-definition",
            Self::NetworkRoleAssignment => "network-role-assignment",
            Self::Gallery => "gallery",
            Self::ImageDefinition => "image-definition",
        }
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hierarchical location a resource lives in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Scope {
    /// Subscription-level scope
    Subscription { subscription: String },
    /// Resource-group-level scope
    ResourceGroup {
        subscription: String,
        resource_group: String,
    },
}

impl Scope {
    /// Fully qualified ARM scope identifier
    pub fn id(&self) -> String {
        match self {
            Self::Subscription { subscription } => format!("/subscriptions/{subscription}"),
            Self::ResourceGroup {
                subscription,
                resource_group,
            } => {
                format!("/subscriptions/{subscription}/resourceGroups/{resource_group}")
            }
        }
    }

    pub fn subscription(&self) -> &str {
        match self {
            Self::Subscription { subscription } | Self::ResourceGroup { subscription, .. } => {
                subscription
            }
        }
    }

    /// Resource group component, if this is a group-level scope
    pub fn resource_group(&self) -> Option<&str> {
        match self {
            Self::Subscription { .. } => None,
            Self::ResourceGroup { resource_group, .. } => Some(resource_group),
        }
    }
}

/// Custom role definition properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleProps {
    pub role_name: String,
    pub description: String,
    /// Permitted control-plane actions
    pub actions: Vec<String>,
}

/// Gallery image definition metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageDefinitionProps {
    pub gallery: String,
    pub location: String,
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub os_type: String,
    pub os_state: String,
    pub hyper_v_generation: String,
    pub security_type: String,
}

/// Kind-specific creation payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Payload {
    /// Resource group: region to create in
    Group { location: String },
    /// Managed identity: region to create in
    Identity { location: String },
    /// Custom role definition
    Role(RoleProps),
    /// Role assignment binding an identity to a role at the spec's scope.
    /// Both references are resolved from earlier results in the same run.
    Assignment { identity: SpecId, role: SpecId },
    /// Compute gallery: region to create in
    Gallery { location: String },
    /// Image definition inside a gallery
    ImageDefinition(ImageDefinitionProps),
}

/// One provisionable unit: what to ensure, where, and after what
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSpec {
    pub id: SpecId,
    pub kind: ResourceKind,
    pub name: String,
    pub scope: Scope,
    pub payload: Payload,
    /// Specs that must have a recorded outcome before this one is attempted
    pub depends_on: Vec<SpecId>,
}

/// Resolved identifiers of an existing or freshly created resource.
///
/// Creation responses and existence queries have different shapes upstream;
/// both converge on this handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceHandle {
    /// Fully qualified resource ID
    pub resource_id: String,
    /// Directory principal ID, present for managed identities only
    pub principal_id: Option<String>,
}

impl ResourceHandle {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            principal_id: None,
        }
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_ids_are_arm_paths() {
        let sub = Scope::Subscription {
            subscription: "sub1".into(),
        };
        assert_eq!(sub.id(), "/subscriptions/sub1");

        let rg = Scope::ResourceGroup {
            subscription: "sub1".into(),
            resource_group: "rg1".into(),
        };
        assert_eq!(rg.id(), "/subscriptions/sub1/resourceGroups/rg1");
        assert_eq!(rg.resource_group(), Some("rg1"));
        assert_eq!(rg.subscription(), "sub1");
    }

    #[test]
    fn handle_builder_sets_principal() {
        let handle = ResourceHandle::new("/subscriptions/s/x").with_principal("abc-123");
        assert_eq!(handle.principal_id.as_deref(), Some("abc-123"));
    }
}
