//! Reconciler - brings the project's resources to the declared state.
//!
//! Resources are idempotent by skip: an existing resource is never modified.
//! Bindings are idempotent by reapply: every grant is issued on every run.
//! The first failure ends the run.

use tracing::{error, info, warn};

use crate::config::Configuration;
use crate::error::{ProviderError, ReconcileError};
use crate::plan::{Plan, Step};
use crate::provider::CloudProvider;
use crate::report::{ReconcileResult, RunReport, Subject};
use crate::resource::{BindingSpec, ResourceSpec};

pub struct Reconciler<P> {
    provider: P,
}

impl<P: CloudProvider> Reconciler<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Create the resource unless one with the same kind and name exists.
    pub async fn ensure_resource(&self, spec: &ResourceSpec) -> ReconcileResult {
        let kind = spec.kind();
        let name = spec.name.as_str();

        match self.provider.exists(spec).await {
            Ok(true) => {
                info!(kind = %kind, name = %name, "Already exists, skipping");
                return ReconcileResult::AlreadyExists;
            }
            Ok(false) => {}
            Err(e) => {
                error!(kind = %kind, name = %name, error = %e, "Existence check failed");
                return ReconcileResult::Failed(ReconcileError::from_provider(kind, name, e));
            }
        }

        info!(kind = %kind, name = %name, "Creating");
        match self.provider.create(spec).await {
            Ok(()) => {
                info!(kind = %kind, name = %name, "Created");
                ReconcileResult::Created
            }
            // Someone else created it between the check and the create
            Err(ProviderError::AlreadyExists(_)) => {
                warn!(kind = %kind, name = %name, "Created concurrently, skipping");
                ReconcileResult::AlreadyExists
            }
            Err(e) => {
                error!(kind = %kind, name = %name, error = %e, "Create failed");
                ReconcileResult::Failed(ReconcileError::from_provider(kind, name, e))
            }
        }
    }

    /// Grant unconditionally; re-granting a held role is a no-op upstream.
    pub async fn apply_binding(&self, binding: &BindingSpec) -> ReconcileResult {
        match self.provider.grant(binding).await {
            Ok(()) => {
                info!(
                    resource = %binding.target,
                    member = %binding.member,
                    role = %binding.role,
                    "Granted"
                );
                ReconcileResult::Created
            }
            Err(e) => {
                error!(
                    resource = %binding.target,
                    member = %binding.member,
                    role = %binding.role,
                    error = %e,
                    "Grant failed"
                );
                ReconcileResult::Failed(ReconcileError::from_provider(
                    "iam-binding",
                    &format!("{} {} on {}", binding.member, binding.role, binding.target),
                    e,
                ))
            }
        }
    }

    /// Reconcile the full resource set for `config`.
    pub async fn run(&self, config: &Configuration) -> RunReport {
        let plan = Plan::for_config(config);

        if let Err(e) = plan.validate(&config.project_id) {
            error!(error = %e, "Refusing to run an invalid plan");
            let mut report = RunReport::start();
            report.aborted = Some(e.into());
            report.finish();
            return report;
        }

        self.run_plan(&plan).await
    }

    /// Execute `plan` in order, stopping at the first failure.
    pub async fn run_plan(&self, plan: &Plan) -> RunReport {
        let mut report = RunReport::start();
        let total = plan.steps().len();

        for (i, step) in plan.steps().iter().enumerate() {
            info!(step = i + 1, total, "{}", step);

            let (subject, result) = match step {
                Step::Ensure(spec) => (
                    Subject::Resource(spec.reference()),
                    self.ensure_resource(spec).await,
                ),
                Step::Grant(binding) => (
                    Subject::Binding(binding.clone()),
                    self.apply_binding(binding).await,
                ),
            };

            let failed = result.is_failed();
            report.push(subject, result);
            if failed {
                warn!(
                    remaining = total - i - 1,
                    "Stopping run; remaining steps not attempted"
                );
                break;
            }
        }

        report.finish();
        report
    }
}
