//! Plan executor
//!
//! Walks a plan in dependency order, ensuring each resource exists. A
//! failure in one branch never stops unrelated branches; the aggregate of
//! per-resource outcomes is the run's result.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::client::{ClientError, CloudClient, DependencyHandles};
use crate::config::DEFAULT_SETTLE_DELAY;
use crate::plan::{Plan, PlanError, SkippedFeature, REQUIRED_PROVIDERS};
use crate::resource::{ResourceHandle, ResourceKind, ResourceSpec, SpecId};

/// Why a spec could not be satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Failure {
    /// The control-plane call itself failed
    Api(String),
    /// A prerequisite spec failed, so this one was never attempted
    MissingDependency(SpecId),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api(detail) => write!(f, "{detail}"),
            Self::MissingDependency(dep) => write!(f, "dependency {dep} was not satisfied"),
        }
    }
}

/// What happened to one spec during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Created { handle: ResourceHandle },
    AlreadyExisted { handle: ResourceHandle },
    Failed(Failure),
}

impl Outcome {
    /// Resolved handle, if the resource exists
    pub fn handle(&self) -> Option<&ResourceHandle> {
        match self {
            Self::Created { handle } | Self::AlreadyExisted { handle } => Some(handle),
            Self::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Short label for narration and summary tables
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::AlreadyExisted { .. } => "already existed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result for one spec. Produced exactly once per run, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningResult {
    pub id: SpecId,
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: Outcome,
}

/// What happened to one resource provider during the pre-flight check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderStatus {
    AlreadyRegistered,
    Registered,
    /// The check or registration call failed; narrated, never fatal
    Unavailable(String),
}

/// Aggregate outcome of a run, in plan order
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningSummary {
    pub results: Vec<ProvisioningResult>,
    /// Optional features that generated no specs
    pub skipped: Vec<SkippedFeature>,
    /// Provider registration pre-flight, by namespace
    pub providers: Vec<(String, ProviderStatus)>,
}

impl ProvisioningSummary {
    /// True if any spec's outcome is failed; drives a non-zero exit status
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failed())
    }

    /// Resolved identifiers of every satisfied spec, in plan order
    pub fn identifiers(&self) -> Vec<(SpecId, &ResourceHandle)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.handle().map(|h| (r.id, h)))
            .collect()
    }
}

/// Receives progress events during a run. The executor does no terminal I/O
/// of its own.
pub trait Observer {
    fn provider_checked(&self, _namespace: &str, _status: &ProviderStatus) {}
    fn step_started(&self, _spec: &ResourceSpec) {}
    fn step_finished(&self, _result: &ProvisioningResult) {}
}

struct Silent;

impl Observer for Silent {}

/// Ensures every resource in a plan exists, strictly in dependency order
pub struct Provisioner<'a> {
    client: &'a dyn CloudClient,
    observer: &'a dyn Observer,
    settle_delay: Duration,
}

impl<'a> Provisioner<'a> {
    pub fn new(client: &'a dyn CloudClient) -> Self {
        Self {
            client,
            observer: &Silent,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Set the pause after identity creation, for directory propagation
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Attach a progress observer
    pub fn observer(mut self, observer: &'a dyn Observer) -> Self {
        self.observer = observer;
        self
    }

    /// Run the plan to completion.
    ///
    /// Every spec gets exactly one recorded outcome. A spec whose dependency
    /// failed is recorded as failed without being attempted; everything else
    /// is always attempted.
    pub fn run(&self, plan: &Plan) -> Result<ProvisioningSummary, PlanError> {
        let ordered = plan.ordered()?;

        let providers = self.register_providers();

        let mut handles = DependencyHandles::new();
        let mut results: Vec<ProvisioningResult> = Vec::with_capacity(ordered.len());

        for spec in ordered {
            self.observer.step_started(spec);
            let outcome = self.ensure(spec, &handles);
            if let Some(handle) = outcome.handle() {
                handles.insert(spec.id, handle.clone());
            }
            let result = ProvisioningResult {
                id: spec.id,
                kind: spec.kind,
                name: spec.name.clone(),
                outcome,
            };
            self.observer.step_finished(&result);
            results.push(result);
        }

        Ok(ProvisioningSummary {
            results,
            skipped: plan.skipped.clone(),
            providers,
        })
    }

    /// Ensure one resource exists: check, then create if absent.
    ///
    /// Existence is decided by the live environment, never a local cache.
    fn ensure(&self, spec: &ResourceSpec, handles: &DependencyHandles) -> Outcome {
        // A dependency without a handle failed earlier in the order
        if let Some(missing) = spec
            .depends_on
            .iter()
            .find(|dep| !handles.contains_key(dep))
        {
            return Outcome::Failed(Failure::MissingDependency(*missing));
        }

        match self.client.find(spec) {
            Ok(Some(handle)) => Outcome::AlreadyExisted { handle },
            Ok(None) => {
                let deps: DependencyHandles = spec
                    .depends_on
                    .iter()
                    .map(|dep| (*dep, handles[dep].clone()))
                    .collect();
                match self.client.create(spec, &deps) {
                    Ok(handle) => {
                        if spec.kind == ResourceKind::ManagedIdentity
                            && !self.settle_delay.is_zero()
                        {
                            thread::sleep(self.settle_delay);
                        }
                        Outcome::Created { handle }
                    }
                    Err(ClientError(detail)) => Outcome::Failed(Failure::Api(detail)),
                }
            }
            Err(ClientError(detail)) => Outcome::Failed(Failure::Api(detail)),
        }
    }

    /// Check and register required resource providers. Problems are
    /// narrated through the observer but never counted as resource failures.
    fn register_providers(&self) -> Vec<(String, ProviderStatus)> {
        REQUIRED_PROVIDERS
            .iter()
            .map(|namespace| {
                let status = match self.client.provider_registered(namespace) {
                    Ok(true) => ProviderStatus::AlreadyRegistered,
                    Ok(false) => match self.client.register_provider(namespace) {
                        Ok(()) => ProviderStatus::Registered,
                        Err(ClientError(detail)) => ProviderStatus::Unavailable(detail),
                    },
                    Err(ClientError(detail)) => ProviderStatus::Unavailable(detail),
                };
                self.observer.provider_checked(namespace, &status);
                ((*namespace).to_string(), status)
            })
            .collect()
    }
}
