//! stigimg-setup: provisioning for the STIG image build project
//!
//! Reconciles the network, service account, KMS keys, buckets, artifact
//! repository and IAM bindings that the image build and scan pipeline
//! depends on. Safe to rerun: existing resources are skipped, bindings are
//! re-granted.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod prompt;
pub mod provider;
pub mod reconciler;
pub mod report;
pub mod resource;

pub use config::{ConfigInputs, Configuration};
pub use error::{ConfigError, PlanError, ProviderError, ReconcileError};
pub use plan::{Plan, Step};
pub use provider::{CloudProvider, GcloudProvider, MemoryProvider};
pub use reconciler::Reconciler;
pub use report::{ReconcileResult, RunReport};
pub use resource::{BindingSpec, ResourceKind, ResourceSpec};
