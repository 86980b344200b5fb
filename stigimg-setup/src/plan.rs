//! The declared, ordered provisioning plan.
//!
//! Ordering is a fixed total order; [`Plan::validate`] checks that every
//! step's dependencies appear before it.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::config::Configuration;
use crate::error::PlanError;
use crate::resource::{
    BindingSpec, BindingTarget, KeyRef, Member, ResourceKind, ResourceParams, ResourceRef,
    ResourceSpec, service_account_email,
};

pub const NETWORK: &str = "stig-network";
pub const FIREWALL_RULE: &str = "stig-allow-iap-ssh";
pub const PACKER_SERVICE_ACCOUNT: &str = "stig-packer";
pub const KEYRING: &str = "stig-keyring";
pub const STORAGE_KEY: &str = "storage-key";
pub const IMAGE_KEY: &str = "image-key";
pub const REPOSITORY: &str = "stig-images";

/// Source range used by Identity-Aware Proxy TCP forwarding.
pub const IAP_SOURCE_RANGE: &str = "35.235.240.0/20";

const ROLE_INSTANCE_ADMIN: &str = "roles/compute.instanceAdmin.v1";
const ROLE_SA_USER: &str = "roles/iam.serviceAccountUser";
const ROLE_KMS_ENCRYPTER: &str = "roles/cloudkms.cryptoKeyEncrypterDecrypter";
const ROLE_OBJECT_ADMIN: &str = "roles/storage.objectAdmin";
const ROLE_STORAGE_ADMIN: &str = "roles/storage.admin";
const ROLE_AR_WRITER: &str = "roles/artifactregistry.writer";
const ROLE_AR_READER: &str = "roles/artifactregistry.reader";

/// One step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Step {
    Ensure(ResourceSpec),
    Grant(BindingSpec),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Ensure(spec) => write!(f, "ensure {}", spec.reference()),
            Step::Grant(binding) => write!(f, "grant {}", binding),
        }
    }
}

/// Identities of the Google-managed accounts that need grants.
struct Principals {
    packer: Member,
    cloudbuild: Member,
    compute_default: Member,
    storage_agent: Member,
    compute_agent: Member,
}

impl Principals {
    fn new(config: &Configuration) -> Self {
        let n = &config.project_number;
        Self {
            packer: Member::service_account(service_account_email(
                PACKER_SERVICE_ACCOUNT,
                &config.project_id,
            )),
            cloudbuild: Member::service_account(format!("{}@cloudbuild.gserviceaccount.com", n)),
            compute_default: Member::service_account(format!(
                "{}-compute@developer.gserviceaccount.com",
                n
            )),
            storage_agent: Member::service_account(format!(
                "service-{}@gs-project-accounts.iam.gserviceaccount.com",
                n
            )),
            compute_agent: Member::service_account(format!(
                "service-{}@compute-system.iam.gserviceaccount.com",
                n
            )),
        }
    }
}

/// Ordered list of steps for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Build the plan for the STIG image build project.
    pub fn for_config(config: &Configuration) -> Self {
        let p = Principals::new(config);
        let region = config.region.clone();

        let storage_key = KeyRef {
            project: config.project_id.clone(),
            location: region.clone(),
            keyring: KEYRING.to_string(),
            key: STORAGE_KEY.to_string(),
        };
        let key_target = |key: &str| BindingTarget::KmsKey {
            keyring: KEYRING.to_string(),
            key: key.to_string(),
            location: region.clone(),
        };
        let bucket_target = |name: &str| BindingTarget::Bucket {
            name: name.to_string(),
        };
        let repo_target = BindingTarget::Repository {
            name: REPOSITORY.to_string(),
            location: region.clone(),
        };

        let steps = vec![
            // Network for the Packer build VM
            Step::Ensure(ResourceSpec::new(
                NETWORK,
                ResourceParams::Network { auto_subnets: true },
            )),
            Step::Ensure(ResourceSpec::new(
                FIREWALL_RULE,
                ResourceParams::FirewallRule {
                    network: NETWORK.to_string(),
                    allow: vec!["tcp:22".to_string()],
                    source_ranges: vec![IAP_SOURCE_RANGE.to_string()],
                },
            )),
            // Service account and its project roles
            Step::Ensure(ResourceSpec::new(
                PACKER_SERVICE_ACCOUNT,
                ResourceParams::ServiceAccount {
                    display_name: "STIG image builder".to_string(),
                },
            )),
            Step::Grant(BindingSpec::new(
                BindingTarget::Project,
                p.packer.clone(),
                ROLE_INSTANCE_ADMIN,
            )),
            Step::Grant(BindingSpec::new(
                BindingTarget::Project,
                p.packer.clone(),
                ROLE_SA_USER,
            )),
            Step::Grant(BindingSpec::new(
                BindingTarget::Project,
                p.cloudbuild.clone(),
                ROLE_INSTANCE_ADMIN,
            )),
            Step::Grant(BindingSpec::new(
                BindingTarget::ServiceAccount {
                    account: PACKER_SERVICE_ACCOUNT.to_string(),
                },
                p.cloudbuild.clone(),
                ROLE_SA_USER,
            )),
            // Encryption keys; agents need access before buckets use them
            Step::Ensure(ResourceSpec::new(
                KEYRING,
                ResourceParams::KmsKeyring {
                    location: region.clone(),
                },
            )),
            Step::Ensure(ResourceSpec::new(
                STORAGE_KEY,
                ResourceParams::KmsKey {
                    keyring: KEYRING.to_string(),
                    location: region.clone(),
                    purpose: "encryption".to_string(),
                },
            )),
            Step::Ensure(ResourceSpec::new(
                IMAGE_KEY,
                ResourceParams::KmsKey {
                    keyring: KEYRING.to_string(),
                    location: region.clone(),
                    purpose: "encryption".to_string(),
                },
            )),
            Step::Grant(BindingSpec::new(
                key_target(STORAGE_KEY),
                p.storage_agent.clone(),
                ROLE_KMS_ENCRYPTER,
            )),
            Step::Grant(BindingSpec::new(
                key_target(IMAGE_KEY),
                p.compute_agent.clone(),
                ROLE_KMS_ENCRYPTER,
            )),
            // Buckets
            Step::Ensure(ResourceSpec::new(
                config.bucket_name.clone(),
                ResourceParams::Bucket {
                    location: region.clone(),
                    default_kms_key: Some(storage_key.clone()),
                },
            )),
            Step::Ensure(ResourceSpec::new(
                config.cloudbuild_bucket.clone(),
                ResourceParams::Bucket {
                    location: region.clone(),
                    default_kms_key: Some(storage_key),
                },
            )),
            Step::Grant(BindingSpec::new(
                bucket_target(&config.bucket_name),
                p.compute_default.clone(),
                ROLE_OBJECT_ADMIN,
            )),
            Step::Grant(BindingSpec::new(
                bucket_target(&config.bucket_name),
                p.packer.clone(),
                ROLE_OBJECT_ADMIN,
            )),
            Step::Grant(BindingSpec::new(
                bucket_target(&config.bucket_name),
                p.cloudbuild.clone(),
                ROLE_OBJECT_ADMIN,
            )),
            Step::Grant(BindingSpec::new(
                bucket_target(&config.cloudbuild_bucket),
                p.cloudbuild.clone(),
                ROLE_STORAGE_ADMIN,
            )),
            // Artifact repository for the Packer builder image
            Step::Ensure(ResourceSpec::new(
                REPOSITORY,
                ResourceParams::ArtifactRepository {
                    location: region.clone(),
                    format: "docker".to_string(),
                },
            )),
            Step::Grant(BindingSpec::new(
                repo_target.clone(),
                p.cloudbuild,
                ROLE_AR_WRITER,
            )),
            Step::Grant(BindingSpec::new(
                repo_target,
                p.compute_default,
                ROLE_AR_READER,
            )),
        ];

        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.steps.iter().filter_map(|s| match s {
            Step::Ensure(spec) => Some(spec),
            Step::Grant(_) => None,
        })
    }

    pub fn bindings(&self) -> impl Iterator<Item = &BindingSpec> {
        self.steps.iter().filter_map(|s| match s {
            Step::Grant(binding) => Some(binding),
            Step::Ensure(_) => None,
        })
    }

    /// Check name uniqueness and that every dependency precedes its dependent.
    ///
    /// A binding depends on its target resource and, when the member is a
    /// service account declared in this plan, on that account as well.
    pub fn validate(&self, project_id: &str) -> Result<(), PlanError> {
        let managed_accounts: Vec<(Member, ResourceRef)> = self
            .resources()
            .filter(|spec| spec.kind() == ResourceKind::ServiceAccount)
            .map(|spec| {
                (
                    Member::service_account(service_account_email(&spec.name, project_id)),
                    spec.reference(),
                )
            })
            .collect();

        let mut seen: HashSet<ResourceRef> = HashSet::new();

        for step in &self.steps {
            let deps = match step {
                Step::Ensure(spec) => spec.dependencies(),
                Step::Grant(binding) => {
                    let mut deps: Vec<ResourceRef> = binding.target.resource().into_iter().collect();
                    deps.extend(
                        managed_accounts
                            .iter()
                            .filter(|(member, _)| *member == binding.member)
                            .map(|(_, r)| r.clone()),
                    );
                    deps
                }
            };

            if let Some(missing) = deps.into_iter().find(|d| !seen.contains(d)) {
                return Err(PlanError::UnorderedDependency {
                    step: step.to_string(),
                    kind: missing.kind,
                    name: missing.name,
                });
            }

            if let Step::Ensure(spec) = step {
                if !seen.insert(spec.reference()) {
                    return Err(PlanError::Duplicate {
                        kind: spec.kind(),
                        name: spec.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
