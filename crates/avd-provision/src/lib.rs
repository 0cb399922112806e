//! AVD Provision - Prerequisite Provisioning Library
//!
//! This crate provides the resource model and executor for ensuring the
//! cloud prerequisites of an Azure Virtual Desktop Custom Image Template
//! build exist, plus the silent application-install tasks that run inside a
//! template build VM.
//!
//! # Architecture
//!
//! - [`AvdConfig`]: Target environment description (names, region, optional
//!   feature toggles)
//! - [`Plan`]: The full set of resources to ensure, with explicit dependency
//!   edges and a deterministic topological order
//! - [`CloudClient`] trait: Narrow interface to the cloud control plane
//! - [`Provisioner`]: Check-then-create executor; partial failures never
//!   stop unrelated branches
//! - [`apps`] module: Silent install tasks for the build VM
//!
//! # Example
//!
//! ```ignore
//! use avd_provision::{AvdConfig, Plan, Provisioner};
//!
//! let config = AvdConfig::builder()
//!     .subscription("0000-...")
//!     .resource_group("avd-images")
//!     .location("eastus")
//!     .gallery_name("avdGallery".to_string())
//!     .build();
//!
//! let plan = Plan::prerequisites(&config);
//! let summary = Provisioner::new(&client).run(&plan)?;
//! if summary.has_failures() {
//!     // inspect summary.results before using the environment
//! }
//! ```
//!
//! Existing resources are matched by exact name within their scope and
//! treated as satisfied; configuration drift is not detected or reconciled.

pub mod apps;
pub mod client;
pub mod config;
pub mod executor;
pub mod plan;
pub mod resource;

pub use client::{ClientError, CloudClient, DependencyHandles};
pub use config::AvdConfig;
pub use executor::{
    Failure, Observer, Outcome, ProviderStatus, Provisioner, ProvisioningResult,
    ProvisioningSummary,
};
pub use plan::{Plan, PlanError, SkippedFeature};
pub use resource::{Payload, ResourceHandle, ResourceKind, ResourceSpec, Scope, SpecId};

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    #[derive(Default)]
    struct MockState {
        existing: HashMap<SpecId, ResourceHandle>,
        finds: Vec<SpecId>,
        creates: Vec<SpecId>,
        assignment_deps: Vec<DependencyHandles>,
    }

    /// In-memory stand-in for the control plane. Creations become visible to
    /// later existence checks, like the live environment.
    #[derive(Default)]
    struct MockCloud {
        state: RefCell<MockState>,
        fail_create: HashSet<SpecId>,
        unregistered: RefCell<HashSet<String>>,
    }

    impl MockCloud {
        fn failing(ids: impl IntoIterator<Item = SpecId>) -> Self {
            Self {
                fail_create: ids.into_iter().collect(),
                ..Self::default()
            }
        }

        fn handle_for(spec: &ResourceSpec) -> ResourceHandle {
            let handle = ResourceHandle::new(format!("{}/{}/{}", spec.scope.id(), spec.kind, spec.name));
            if spec.kind == ResourceKind::ManagedIdentity {
                handle.with_principal(format!("principal-{}", spec.name))
            } else {
                handle
            }
        }
    }

    impl CloudClient for MockCloud {
        fn find(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ClientError> {
            let mut state = self.state.borrow_mut();
            state.finds.push(spec.id);
            Ok(state.existing.get(&spec.id).cloned())
        }

        fn create(
            &self,
            spec: &ResourceSpec,
            deps: &DependencyHandles,
        ) -> Result<ResourceHandle, ClientError> {
            let mut state = self.state.borrow_mut();
            state.creates.push(spec.id);
            if spec.kind == ResourceKind::RoleAssignment {
                state.assignment_deps.push(deps.clone());
            }
            if self.fail_create.contains(&spec.id) {
                return Err(ClientError::new("simulated control-plane failure"));
            }
            let handle = Self::handle_for(spec);
            state.existing.insert(spec.id, handle.clone());
            Ok(handle)
        }

        fn provider_registered(&self, namespace: &str) -> Result<bool, ClientError> {
            Ok(!self.unregistered.borrow().contains(namespace))
        }

        fn register_provider(&self, namespace: &str) -> Result<(), ClientError> {
            self.unregistered.borrow_mut().remove(namespace);
            Ok(())
        }
    }

    fn run(cloud: &MockCloud, config: &AvdConfig) -> ProvisioningSummary {
        let plan = Plan::prerequisites(config);
        Provisioner::new(cloud)
            .settle_delay(Duration::ZERO)
            .run(&plan)
            .unwrap()
    }

    #[test]
    fn fresh_environment_creates_everything() {
        let cloud = MockCloud::default();
        let summary = run(&cloud, &AvdConfig::test_config());

        assert_eq!(summary.results.len(), 4);
        assert!(summary
            .results
            .iter()
            .all(|r| matches!(r.outcome, Outcome::Created { .. })));
        assert!(!summary.has_failures());
        assert_eq!(summary.identifiers().len(), 4);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let cloud = MockCloud::default();
        let config = AvdConfig::test_config();
        run(&cloud, &config);

        let creates_after_first = cloud.state.borrow().creates.len();
        let summary = run(&cloud, &config);

        assert!(summary
            .results
            .iter()
            .all(|r| matches!(r.outcome, Outcome::AlreadyExisted { .. })));
        assert_eq!(cloud.state.borrow().creates.len(), creates_after_first);
    }

    #[test]
    fn identity_failure_marks_dependent_assignment_without_attempting_it() {
        let cloud = MockCloud::failing([SpecId::Identity]);
        let config = AvdConfig::builder()
            .subscription("sub1")
            .resource_group("rg1")
            .location("eastus")
            .gallery_name("gal1".to_string())
            .build();
        let summary = run(&cloud, &config);

        let by_id = |id: SpecId| {
            summary
                .results
                .iter()
                .find(|r| r.id == id)
                .unwrap_or_else(|| panic!("no result for {id}"))
        };

        assert!(matches!(
            by_id(SpecId::Identity).outcome,
            Outcome::Failed(Failure::Api(_))
        ));
        assert_eq!(
            by_id(SpecId::ImageRoleAssignment).outcome,
            Outcome::Failed(Failure::MissingDependency(SpecId::Identity))
        );
        // The assignment was never attempted against the control plane
        assert!(!cloud
            .state
            .borrow()
            .creates
            .contains(&SpecId::ImageRoleAssignment));
        // An independent branch still succeeded
        assert!(matches!(
            by_id(SpecId::Gallery).outcome,
            Outcome::Created { .. }
        ));
        assert!(summary.has_failures());
    }

    #[test]
    fn assignment_receives_identity_principal_and_role_id() {
        let cloud = MockCloud::default();
        run(&cloud, &AvdConfig::test_config());

        let state = cloud.state.borrow();
        let deps = &state.assignment_deps[0];
        let identity = &deps[&SpecId::Identity];
        assert!(identity.principal_id.is_some());
        assert!(deps.contains_key(&SpecId::ImageRoleDefinition));
    }

    #[test]
    fn identity_handle_exposes_principal_on_both_paths() {
        let cloud = MockCloud::default();
        let config = AvdConfig::test_config();

        let first = run(&cloud, &config);
        let second = run(&cloud, &config);

        for summary in [first, second] {
            let identity = summary
                .results
                .iter()
                .find(|r| r.id == SpecId::Identity)
                .unwrap();
            let handle = identity.outcome.handle().unwrap();
            assert!(handle.principal_id.is_some());
        }
    }

    #[test]
    fn outcomes_are_recorded_in_dependency_order() {
        let cloud = MockCloud::default();
        let summary = run(&cloud, &AvdConfig::test_config());

        let pos = |id: SpecId| summary.results.iter().position(|r| r.id == id).unwrap();
        assert!(pos(SpecId::Identity) < pos(SpecId::ImageRoleAssignment));
        assert!(pos(SpecId::ImageRoleDefinition) < pos(SpecId::ImageRoleAssignment));
    }

    #[test]
    fn skipped_features_reach_the_summary() {
        let cloud = MockCloud::default();
        let summary = run(&cloud, &AvdConfig::test_config());

        assert!(summary.skipped.contains(&SkippedFeature::Gallery));
        assert!(summary.skipped.contains(&SkippedFeature::ImageDefinition));
    }

    #[test]
    fn unregistered_providers_are_registered_in_preflight() {
        let cloud = MockCloud::default();
        cloud
            .unregistered
            .borrow_mut()
            .insert("Microsoft.VirtualMachineImages".to_string());

        let summary = run(&cloud, &AvdConfig::test_config());

        let status = summary
            .providers
            .iter()
            .find(|(ns, _)| ns == "Microsoft.VirtualMachineImages")
            .map(|(_, s)| s.clone())
            .unwrap();
        assert_eq!(status, ProviderStatus::Registered);
        assert!(summary
            .providers
            .iter()
            .filter(|(ns, _)| ns != "Microsoft.VirtualMachineImages")
            .all(|(_, s)| *s == ProviderStatus::AlreadyRegistered));
        assert!(!summary.has_failures());
    }

    #[test]
    fn gallery_scenario_attempts_six_specs() {
        let cloud = MockCloud::default();
        let config = AvdConfig::builder()
            .subscription("sub1")
            .resource_group("rg1")
            .location("eastus")
            .gallery_name("gal1".to_string())
            .image_definition_name("def1".to_string())
            .build();

        let summary = run(&cloud, &config);
        assert_eq!(summary.results.len(), 6);
        assert_eq!(summary.identifiers().len(), 6);

        let pos = |id: SpecId| summary.results.iter().position(|r| r.id == id).unwrap();
        assert!(pos(SpecId::Gallery) < pos(SpecId::ImageDefinition));
    }

    #[test]
    fn summary_serializes_for_downstream_consumption() {
        let cloud = MockCloud::default();
        let summary = run(&cloud, &AvdConfig::test_config());

        // Whole summary round-trips through serde (JSON output mode)
        let json = serde_json::to_string(&summary);
        assert!(json.is_ok());
    }
}
