//! Cloud resource providers.
//!
//! - gcloud: shells out to the `gcloud` CLI
//! - memory: in-process provider for tests and rehearsals

pub mod gcloud;
pub mod memory;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::resource::{BindingSpec, ResourceSpec};

pub use gcloud::GcloudProvider;
pub use memory::MemoryProvider;

/// Control-plane operations the reconciler relies on.
///
/// `create` is not idempotent (it fails with `AlreadyExists` when the name is
/// taken); `grant` is.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Look up the numeric project number for a project ID.
    async fn project_number(&self, project_id: &str) -> Result<String, ProviderError>;

    /// Whether a resource of this kind and name exists.
    async fn exists(&self, spec: &ResourceSpec) -> Result<bool, ProviderError>;

    /// Create the resource described by `spec`.
    async fn create(&self, spec: &ResourceSpec) -> Result<(), ProviderError>;

    /// Grant a role to a member on the binding's target.
    async fn grant(&self, binding: &BindingSpec) -> Result<(), ProviderError>;
}
