//! Provisioning plan - dependency-ordered resource set
//!
//! The plan declares every prerequisite resource for one environment along
//! with explicit dependency edges. Execution order is produced by a
//! deterministic topological sort, so ordering is a structural invariant
//! rather than an artifact of statement order.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::AvdConfig;
use crate::resource::{
    ImageDefinitionProps, Payload, ResourceKind, ResourceSpec, RoleProps, Scope, SpecId,
};

/// Control-plane actions the image-build role needs on the build resource
/// group
const IMAGE_ROLE_ACTIONS: &[&str] = &[
    "Microsoft.Compute/galleries/read",
    "Microsoft.Compute/galleries/images/read",
    "Microsoft.Compute/galleries/images/versions/read",
    "Microsoft.Compute/galleries/images/versions/write",
    "Microsoft.Compute/images/write",
    "Microsoft.Compute/images/read",
    "Microsoft.Compute/images/delete",
];

/// Actions the builder needs on an existing virtual network's resource group
const NETWORK_ROLE_ACTIONS: &[&str] = &[
    "Microsoft.Network/virtualNetworks/read",
    "Microsoft.Network/virtualNetworks/subnets/join/action",
];

/// Resource providers the AVD image-build workflow requires on the
/// subscription. Checked and registered before the plan runs.
pub const REQUIRED_PROVIDERS: &[&str] = &[
    "Microsoft.DesktopVirtualization",
    "Microsoft.VirtualMachineImages",
    "Microsoft.Storage",
    "Microsoft.Compute",
    "Microsoft.Network",
    "Microsoft.KeyVault",
    "Microsoft.ContainerInstance",
];

/// Optional feature that was not requested and therefore generated no specs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkippedFeature {
    NetworkRoles,
    Gallery,
    ImageDefinition,
}

impl SkippedFeature {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkRoles => "networking roles (no network resource group supplied)",
            Self::Gallery => "gallery (no gallery name supplied)",
            Self::ImageDefinition => "image definition (no image definition name supplied)",
        }
    }
}

impl fmt::Display for SkippedFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural problems in a plan's dependency graph
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("dependency cycle involving {0}")]
    DependencyCycle(SpecId),
    #[error("{spec} depends on {dependency}, which is not in the plan")]
    UnknownDependency { spec: SpecId, dependency: SpecId },
}

/// The full, ordered set of resources to ensure for one run
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub specs: Vec<ResourceSpec>,
    /// Optional features that generated no specs (skipped, not failed)
    pub skipped: Vec<SkippedFeature>,
}

impl Plan {
    /// Build the prerequisite plan for a target environment.
    ///
    /// Always generated: resource group, managed identity, image role
    /// definition, image role assignment. Gated on configuration: networking
    /// role definition/assignment, gallery, image definition.
    pub fn prerequisites(config: &AvdConfig) -> Self {
        let group_scope = Scope::ResourceGroup {
            subscription: config.subscription.clone(),
            resource_group: config.resource_group.clone(),
        };

        let mut specs = vec![
            ResourceSpec {
                id: SpecId::ResourceGroup,
                kind: ResourceKind::ResourceGroup,
                name: config.resource_group.clone(),
                scope: Scope::Subscription {
                    subscription: config.subscription.clone(),
                },
                payload: Payload::Group {
                    location: config.location.clone(),
                },
                depends_on: vec![],
            },
            ResourceSpec {
                id: SpecId::Identity,
                kind: ResourceKind::ManagedIdentity,
                name: config.identity_name.clone(),
                scope: group_scope.clone(),
                payload: Payload::Identity {
                    location: config.location.clone(),
                },
                depends_on: vec![SpecId::ResourceGroup],
            },
            ResourceSpec {
                id: SpecId::ImageRoleDefinition,
                kind: ResourceKind::RoleDefinition,
                name: config.image_role_name(),
                scope: group_scope.clone(),
                payload: Payload::Role(RoleProps {
                    role_name: config.image_role_name(),
                    description: "Image builder access to read and write images".into(),
                    actions: IMAGE_ROLE_ACTIONS.iter().map(ToString::to_string).collect(),
                }),
                depends_on: vec![SpecId::ResourceGroup],
            },
            ResourceSpec {
                id: SpecId::ImageRoleAssignment,
                kind: ResourceKind::RoleAssignment,
                name: config.image_role_name(),
                scope: group_scope.clone(),
                payload: Payload::Assignment {
                    identity: SpecId::Identity,
                    role: SpecId::ImageRoleDefinition,
                },
                depends_on: vec![SpecId::Identity, SpecId::ImageRoleDefinition],
            },
        ];

        let mut skipped = vec![];

        if let Some(network_rg) = &config.network_resource_group {
            // The network resource group already exists and is not managed
            // here; only the role definition and binding are.
            let network_scope = Scope::ResourceGroup {
                subscription: config.subscription.clone(),
                resource_group: network_rg.clone(),
            };
            specs.push(ResourceSpec {
                id: SpecId::NetworkRoleDefinition,
                kind: ResourceKind::RoleDefinition,
                name: config.network_role_name(),
                scope: network_scope.clone(),
                payload: Payload::Role(RoleProps {
                    role_name: config.network_role_name(),
                    description: "Image builder access to join an existing virtual network".into(),
                    actions: NETWORK_ROLE_ACTIONS.iter().map(ToString::to_string).collect(),
                }),
                depends_on: vec![],
            });
            specs.push(ResourceSpec {
                id: SpecId::NetworkRoleAssignment,
                kind: ResourceKind::RoleAssignment,
                name: config.network_role_name(),
                scope: network_scope,
                payload: Payload::Assignment {
                    identity: SpecId::Identity,
                    role: SpecId::NetworkRoleDefinition,
                },
                depends_on: vec![SpecId::Identity, SpecId::NetworkRoleDefinition],
            });
        } else {
            skipped.push(SkippedFeature::NetworkRoles);
        }

        if let Some(gallery) = &config.gallery_name {
            specs.push(ResourceSpec {
                id: SpecId::Gallery,
                kind: ResourceKind::Gallery,
                name: gallery.clone(),
                scope: group_scope.clone(),
                payload: Payload::Gallery {
                    location: config.location.clone(),
                },
                depends_on: vec![SpecId::ResourceGroup],
            });

            if let Some(image_def) = &config.image_definition_name {
                specs.push(ResourceSpec {
                    id: SpecId::ImageDefinition,
                    kind: ResourceKind::GalleryImageDefinition,
                    name: image_def.clone(),
                    scope: group_scope,
                    payload: Payload::ImageDefinition(ImageDefinitionProps {
                        gallery: gallery.clone(),
                        location: config.location.clone(),
                        publisher: config.publisher.clone(),
                        offer: config.offer.clone(),
                        sku: config.sku.clone(),
                        os_type: "Windows".into(),
                        os_state: "Generalized".into(),
                        hyper_v_generation: "V2".into(),
                        security_type: "TrustedLaunch".into(),
                    }),
                    depends_on: vec![SpecId::Gallery],
                });
            } else {
                skipped.push(SkippedFeature::ImageDefinition);
            }
        } else {
            skipped.push(SkippedFeature::Gallery);
            skipped.push(SkippedFeature::ImageDefinition);
        }

        Self { specs, skipped }
    }

    /// Specs in dependency order.
    ///
    /// Deterministic Kahn sort: among ready specs, declaration order wins.
    pub fn ordered(&self) -> Result<Vec<&ResourceSpec>, PlanError> {
        let known: HashSet<SpecId> = self.specs.iter().map(|s| s.id).collect();
        for spec in &self.specs {
            if let Some(dep) = spec.depends_on.iter().find(|d| !known.contains(d)) {
                return Err(PlanError::UnknownDependency {
                    spec: spec.id,
                    dependency: *dep,
                });
            }
        }

        let mut emitted: HashSet<SpecId> = HashSet::new();
        let mut ordered = Vec::with_capacity(self.specs.len());
        while ordered.len() < self.specs.len() {
            let next = self.specs.iter().find(|s| {
                !emitted.contains(&s.id) && s.depends_on.iter().all(|d| emitted.contains(d))
            });
            match next {
                Some(spec) => {
                    emitted.insert(spec.id);
                    ordered.push(spec);
                }
                None => {
                    // Every remaining spec waits on another remaining spec
                    let stuck = self
                        .specs
                        .iter()
                        .find(|s| !emitted.contains(&s.id))
                        .expect("at least one spec remains");
                    return Err(PlanError::DependencyCycle(stuck.id));
                }
            }
        }
        Ok(ordered)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AvdConfig;

    fn position(order: &[&ResourceSpec], id: SpecId) -> usize {
        order
            .iter()
            .position(|s| s.id == id)
            .unwrap_or_else(|| panic!("{id} not in plan"))
    }

    #[test]
    fn base_plan_has_exactly_four_specs() {
        let plan = Plan::prerequisites(&AvdConfig::test_config());
        assert_eq!(plan.len(), 4);

        let ids: Vec<SpecId> = plan.specs.iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            vec![
                SpecId::ResourceGroup,
                SpecId::Identity,
                SpecId::ImageRoleDefinition,
                SpecId::ImageRoleAssignment,
            ]
        );
    }

    #[test]
    fn base_plan_skips_all_optional_features() {
        let plan = Plan::prerequisites(&AvdConfig::test_config());
        assert!(plan.skipped.contains(&SkippedFeature::NetworkRoles));
        assert!(plan.skipped.contains(&SkippedFeature::Gallery));
        assert!(plan.skipped.contains(&SkippedFeature::ImageDefinition));
        assert!(!plan.specs.iter().any(|s| s.kind == ResourceKind::Gallery));
    }

    #[test]
    fn assignment_ordered_after_identity_and_role() {
        let plan = Plan::prerequisites(&AvdConfig::test_config());
        let order = plan.ordered().unwrap();

        let assignment = position(&order, SpecId::ImageRoleAssignment);
        assert!(position(&order, SpecId::Identity) < assignment);
        assert!(position(&order, SpecId::ImageRoleDefinition) < assignment);
        assert_eq!(position(&order, SpecId::ResourceGroup), 0);
    }

    #[test]
    fn gallery_options_add_two_specs() {
        let config = AvdConfig::builder()
            .subscription("sub1")
            .resource_group("rg1")
            .location("eastus")
            .gallery_name("gal1".to_string())
            .image_definition_name("def1".to_string())
            .build();

        let plan = Plan::prerequisites(&config);
        assert_eq!(plan.len(), 6);

        let order = plan.ordered().unwrap();
        assert!(position(&order, SpecId::Gallery) < position(&order, SpecId::ImageDefinition));

        let image_def = order
            .iter()
            .find(|s| s.id == SpecId::ImageDefinition)
            .unwrap();
        assert_eq!(image_def.depends_on, vec![SpecId::Gallery]);
        assert!(!plan.skipped.contains(&SkippedFeature::Gallery));
    }

    #[test]
    fn gallery_without_image_definition_skips_only_the_definition() {
        let config = AvdConfig::builder()
            .subscription("sub1")
            .resource_group("rg1")
            .location("eastus")
            .gallery_name("gal1".to_string())
            .build();

        let plan = Plan::prerequisites(&config);
        assert_eq!(plan.len(), 5);
        assert!(plan.skipped.contains(&SkippedFeature::ImageDefinition));
        assert!(!plan.skipped.contains(&SkippedFeature::Gallery));
    }

    #[test]
    fn network_resource_group_adds_roles_at_network_scope() {
        let config = AvdConfig::builder()
            .subscription("sub1")
            .resource_group("rg1")
            .location("eastus")
            .network_resource_group("net-rg".to_string())
            .build();

        let plan = Plan::prerequisites(&config);
        assert_eq!(plan.len(), 6);

        let net_def = plan
            .specs
            .iter()
            .find(|s| s.id == SpecId::NetworkRoleDefinition)
            .unwrap();
        assert_eq!(net_def.scope.resource_group(), Some("net-rg"));

        let order = plan.ordered().unwrap();
        let net_assignment = position(&order, SpecId::NetworkRoleAssignment);
        assert!(position(&order, SpecId::Identity) < net_assignment);
        assert!(position(&order, SpecId::NetworkRoleDefinition) < net_assignment);
    }

    #[test]
    fn ordering_is_deterministic() {
        let config = AvdConfig::builder()
            .subscription("sub1")
            .resource_group("rg1")
            .location("eastus")
            .network_resource_group("net-rg".to_string())
            .gallery_name("gal1".to_string())
            .image_definition_name("def1".to_string())
            .build();

        let plan = Plan::prerequisites(&config);
        let first: Vec<SpecId> = plan.ordered().unwrap().iter().map(|s| s.id).collect();
        let second: Vec<SpecId> = plan.ordered().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn cycle_is_a_structural_error() {
        let mut plan = Plan::prerequisites(&AvdConfig::test_config());
        // Point the resource group back at the assignment
        plan.specs[0].depends_on = vec![SpecId::ImageRoleAssignment];

        assert!(matches!(
            plan.ordered(),
            Err(PlanError::DependencyCycle(_))
        ));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut plan = Plan::prerequisites(&AvdConfig::test_config());
        plan.specs[1].depends_on.push(SpecId::Gallery);

        assert_eq!(
            plan.ordered(),
            Err(PlanError::UnknownDependency {
                spec: SpecId::Identity,
                dependency: SpecId::Gallery,
            })
        );
    }
}
