//! Provider backed by the `gcloud` CLI.
//!
//! Each resource kind maps to a `describe` command for the existence check
//! and a `create` command; each binding target maps to an
//! `add-iam-policy-binding` command.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::CloudProvider;
use crate::error::ProviderError;
use crate::resource::{
    BindingSpec, BindingTarget, ResourceParams, ResourceSpec, service_account_email,
};

/// Runs `gcloud` against one project.
pub struct GcloudProvider {
    bin: String,
    project_id: String,
}

impl GcloudProvider {
    pub fn new(bin: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            project_id: project_id.into(),
        }
    }

    /// Run gcloud with `args`, returning stdout on success.
    pub async fn run(&self, args: &[String]) -> Result<String, ProviderError> {
        debug!(bin = %self.bin, args = ?args, "Running gcloud");

        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| ProviderError::Spawn {
                program: self.bin.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::from_stderr(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn common(&self, mut args: Vec<String>) -> Vec<String> {
        args.push(format!("--project={}", self.project_id));
        args.push("--quiet".to_string());
        args
    }

    fn sa_email(&self, account: &str) -> String {
        service_account_email(account, &self.project_id)
    }

    pub fn describe_args(&self, spec: &ResourceSpec) -> Vec<String> {
        let name = spec.name.clone();
        let mut args: Vec<String> = match &spec.params {
            ResourceParams::Network { .. } => {
                vec!["compute".into(), "networks".into(), "describe".into(), name]
            }
            ResourceParams::FirewallRule { .. } => vec![
                "compute".into(),
                "firewall-rules".into(),
                "describe".into(),
                name,
            ],
            ResourceParams::ServiceAccount { .. } => vec![
                "iam".into(),
                "service-accounts".into(),
                "describe".into(),
                self.sa_email(&name),
            ],
            ResourceParams::KmsKeyring { location } => vec![
                "kms".into(),
                "keyrings".into(),
                "describe".into(),
                name,
                format!("--location={}", location),
            ],
            ResourceParams::KmsKey {
                keyring, location, ..
            } => vec![
                "kms".into(),
                "keys".into(),
                "describe".into(),
                name,
                format!("--keyring={}", keyring),
                format!("--location={}", location),
            ],
            ResourceParams::Bucket { .. } => vec![
                "storage".into(),
                "buckets".into(),
                "describe".into(),
                format!("gs://{}", name),
            ],
            ResourceParams::ArtifactRepository { location, .. } => vec![
                "artifacts".into(),
                "repositories".into(),
                "describe".into(),
                name,
                format!("--location={}", location),
            ],
        };
        args.push("--format=value(name)".to_string());
        self.common(args)
    }

    pub fn create_args(&self, spec: &ResourceSpec) -> Vec<String> {
        let name = spec.name.clone();
        let args: Vec<String> = match &spec.params {
            ResourceParams::Network { auto_subnets } => vec![
                "compute".into(),
                "networks".into(),
                "create".into(),
                name,
                format!(
                    "--subnet-mode={}",
                    if *auto_subnets { "auto" } else { "custom" }
                ),
            ],
            ResourceParams::FirewallRule {
                network,
                allow,
                source_ranges,
            } => vec![
                "compute".into(),
                "firewall-rules".into(),
                "create".into(),
                name,
                format!("--network={}", network),
                "--direction=INGRESS".into(),
                format!("--allow={}", allow.join(",")),
                format!("--source-ranges={}", source_ranges.join(",")),
            ],
            ResourceParams::ServiceAccount { display_name } => vec![
                "iam".into(),
                "service-accounts".into(),
                "create".into(),
                name,
                format!("--display-name={}", display_name),
            ],
            ResourceParams::KmsKeyring { location } => vec![
                "kms".into(),
                "keyrings".into(),
                "create".into(),
                name,
                format!("--location={}", location),
            ],
            ResourceParams::KmsKey {
                keyring,
                location,
                purpose,
            } => vec![
                "kms".into(),
                "keys".into(),
                "create".into(),
                name,
                format!("--keyring={}", keyring),
                format!("--location={}", location),
                format!("--purpose={}", purpose),
            ],
            ResourceParams::Bucket {
                location,
                default_kms_key,
            } => {
                let mut args: Vec<String> = vec![
                    "storage".into(),
                    "buckets".into(),
                    "create".into(),
                    format!("gs://{}", name),
                    format!("--location={}", location),
                    "--uniform-bucket-level-access".into(),
                ];
                if let Some(key) = default_kms_key {
                    args.push(format!("--default-encryption-key={}", key.resource_path()));
                }
                args
            }
            ResourceParams::ArtifactRepository { location, format } => vec![
                "artifacts".into(),
                "repositories".into(),
                "create".into(),
                name,
                format!("--location={}", location),
                format!("--repository-format={}", format),
            ],
        };
        self.common(args)
    }

    pub fn grant_args(&self, binding: &BindingSpec) -> Vec<String> {
        let mut args: Vec<String> = match &binding.target {
            BindingTarget::Project => vec![
                "projects".into(),
                "add-iam-policy-binding".into(),
                self.project_id.clone(),
            ],
            BindingTarget::ServiceAccount { account } => vec![
                "iam".into(),
                "service-accounts".into(),
                "add-iam-policy-binding".into(),
                self.sa_email(account),
            ],
            BindingTarget::KmsKey {
                keyring,
                key,
                location,
            } => vec![
                "kms".into(),
                "keys".into(),
                "add-iam-policy-binding".into(),
                key.clone(),
                format!("--keyring={}", keyring),
                format!("--location={}", location),
            ],
            BindingTarget::Bucket { name } => vec![
                "storage".into(),
                "buckets".into(),
                "add-iam-policy-binding".into(),
                format!("gs://{}", name),
            ],
            BindingTarget::Repository { name, location } => vec![
                "artifacts".into(),
                "repositories".into(),
                "add-iam-policy-binding".into(),
                name.clone(),
                format!("--location={}", location),
            ],
        };
        args.push(format!("--member={}", binding.member));
        args.push(format!("--role={}", binding.role));
        if binding.target == BindingTarget::Project {
            // Without this gcloud prompts when the policy already has conditions
            args.push("--condition=None".into());
        }
        args.push("--format=none".into());
        self.common(args)
    }
}

#[async_trait]
impl CloudProvider for GcloudProvider {
    async fn project_number(&self, project_id: &str) -> Result<String, ProviderError> {
        let args: Vec<String> = vec![
            "projects".into(),
            "describe".into(),
            project_id.to_string(),
            "--format=value(projectNumber)".into(),
        ];
        self.run(&args).await
    }

    async fn exists(&self, spec: &ResourceSpec) -> Result<bool, ProviderError> {
        match self.run(&self.describe_args(spec)).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<(), ProviderError> {
        self.run(&self.create_args(spec)).await.map(|_| ())
    }

    async fn grant(&self, binding: &BindingSpec) -> Result<(), ProviderError> {
        self.run(&self.grant_args(binding)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{KeyRef, Member};

    fn provider() -> GcloudProvider {
        GcloudProvider::new("gcloud", "demo")
    }

    #[test]
    fn test_describe_service_account_uses_email() {
        let spec = ResourceSpec::new(
            "stig-packer",
            ResourceParams::ServiceAccount {
                display_name: "STIG image builder".into(),
            },
        );
        assert_eq!(
            provider().describe_args(&spec),
            vec![
                "iam",
                "service-accounts",
                "describe",
                "stig-packer@demo.iam.gserviceaccount.com",
                "--format=value(name)",
                "--project=demo",
                "--quiet",
            ]
        );
    }

    #[test]
    fn test_create_bucket_with_default_key() {
        let spec = ResourceSpec::new(
            "demo-stig-artifacts",
            ResourceParams::Bucket {
                location: "us-central1".into(),
                default_kms_key: Some(KeyRef {
                    project: "demo".into(),
                    location: "us-central1".into(),
                    keyring: "stig-keyring".into(),
                    key: "storage-key".into(),
                }),
            },
        );
        assert_eq!(
            provider().create_args(&spec),
            vec![
                "storage",
                "buckets",
                "create",
                "gs://demo-stig-artifacts",
                "--location=us-central1",
                "--uniform-bucket-level-access",
                "--default-encryption-key=projects/demo/locations/us-central1/keyRings/stig-keyring/cryptoKeys/storage-key",
                "--project=demo",
                "--quiet",
            ]
        );
    }

    #[test]
    fn test_create_firewall_rule() {
        let spec = ResourceSpec::new(
            "stig-allow-iap-ssh",
            ResourceParams::FirewallRule {
                network: "stig-network".into(),
                allow: vec!["tcp:22".into()],
                source_ranges: vec!["35.235.240.0/20".into()],
            },
        );
        let args = provider().create_args(&spec);
        assert_eq!(&args[..4], ["compute", "firewall-rules", "create", "stig-allow-iap-ssh"]);
        assert!(args.contains(&"--network=stig-network".to_string()));
        assert!(args.contains(&"--allow=tcp:22".to_string()));
        assert!(args.contains(&"--source-ranges=35.235.240.0/20".to_string()));
    }

    #[test]
    fn test_grant_project_binding() {
        let binding = BindingSpec::new(
            BindingTarget::Project,
            Member::service_account("123@cloudbuild.gserviceaccount.com"),
            "roles/compute.instanceAdmin.v1",
        );
        assert_eq!(
            provider().grant_args(&binding),
            vec![
                "projects",
                "add-iam-policy-binding",
                "demo",
                "--member=serviceAccount:123@cloudbuild.gserviceaccount.com",
                "--role=roles/compute.instanceAdmin.v1",
                "--condition=None",
                "--format=none",
                "--project=demo",
                "--quiet",
            ]
        );
    }

    #[test]
    fn test_grant_key_binding() {
        let binding = BindingSpec::new(
            BindingTarget::KmsKey {
                keyring: "stig-keyring".into(),
                key: "storage-key".into(),
                location: "us-central1".into(),
            },
            Member::service_account("service-1@gs-project-accounts.iam.gserviceaccount.com"),
            "roles/cloudkms.cryptoKeyEncrypterDecrypter",
        );
        let args = provider().grant_args(&binding);
        assert_eq!(&args[..4], ["kms", "keys", "add-iam-policy-binding", "storage-key"]);
        assert!(args.contains(&"--keyring=stig-keyring".to_string()));
        assert!(!args.contains(&"--condition=None".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let provider = GcloudProvider::new("/nonexistent/gcloud", "demo");
        let err = provider.project_number("demo").await.unwrap_err();
        assert!(matches!(err, ProviderError::Spawn { .. }));
    }
}
