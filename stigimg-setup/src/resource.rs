//! Declared resources and IAM bindings.
//!
//! A [`ResourceSpec`] is a name plus a tagged union of per-kind parameters;
//! its [`ResourceKind`] is derived from the variant. A [`BindingSpec`] is a
//! (target, member, role) triple that has no lifecycle of its own.

use std::fmt;

use serde::Serialize;

/// Kinds of resources the reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    FirewallRule,
    ServiceAccount,
    KmsKeyring,
    KmsKey,
    Bucket,
    ArtifactRepository,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::FirewallRule => "firewall-rule",
            ResourceKind::ServiceAccount => "service-account",
            ResourceKind::KmsKeyring => "kms-keyring",
            ResourceKind::KmsKey => "kms-key",
            ResourceKind::Bucket => "bucket",
            ResourceKind::ArtifactRepository => "artifact-repository",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a declared resource: kind plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Reference to a Cloud KMS key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KeyRef {
    pub project: String,
    pub location: String,
    pub keyring: String,
    pub key: String,
}

impl KeyRef {
    /// Full resource path, as accepted by `--default-encryption-key`.
    pub fn resource_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            self.project, self.location, self.keyring, self.key
        )
    }
}

/// Kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceParams {
    Network {
        auto_subnets: bool,
    },
    FirewallRule {
        network: String,
        allow: Vec<String>,
        source_ranges: Vec<String>,
    },
    ServiceAccount {
        display_name: String,
    },
    KmsKeyring {
        location: String,
    },
    KmsKey {
        keyring: String,
        location: String,
        purpose: String,
    },
    Bucket {
        location: String,
        default_kms_key: Option<KeyRef>,
    },
    ArtifactRepository {
        location: String,
        format: String,
    },
}

/// One declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSpec {
    pub name: String,
    pub params: ResourceParams,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, params: ResourceParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self.params {
            ResourceParams::Network { .. } => ResourceKind::Network,
            ResourceParams::FirewallRule { .. } => ResourceKind::FirewallRule,
            ResourceParams::ServiceAccount { .. } => ResourceKind::ServiceAccount,
            ResourceParams::KmsKeyring { .. } => ResourceKind::KmsKeyring,
            ResourceParams::KmsKey { .. } => ResourceKind::KmsKey,
            ResourceParams::Bucket { .. } => ResourceKind::Bucket,
            ResourceParams::ArtifactRepository { .. } => ResourceKind::ArtifactRepository,
        }
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.kind(), self.name.clone())
    }

    /// Resources that must exist before this one can be created.
    pub fn dependencies(&self) -> Vec<ResourceRef> {
        match &self.params {
            ResourceParams::FirewallRule { network, .. } => {
                vec![ResourceRef::new(ResourceKind::Network, network.clone())]
            }
            ResourceParams::KmsKey { keyring, .. } => {
                vec![ResourceRef::new(ResourceKind::KmsKeyring, keyring.clone())]
            }
            ResourceParams::Bucket {
                default_kms_key: Some(key),
                ..
            } => vec![ResourceRef::new(ResourceKind::KmsKey, key.key.clone())],
            _ => Vec::new(),
        }
    }
}

/// Email of a user-managed service account.
pub fn service_account_email(account: &str, project_id: &str) -> String {
    format!("{}@{}.iam.gserviceaccount.com", account, project_id)
}

/// An IAM principal, rendered as `type:identity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Member(String);

impl Member {
    pub fn service_account(email: impl AsRef<str>) -> Self {
        Member(format!("serviceAccount:{}", email.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an IAM binding attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BindingTarget {
    Project,
    ServiceAccount { account: String },
    KmsKey { keyring: String, key: String, location: String },
    Bucket { name: String },
    Repository { name: String, location: String },
}

impl BindingTarget {
    /// The declared resource this binding attaches to, if any.
    pub fn resource(&self) -> Option<ResourceRef> {
        match self {
            BindingTarget::Project => None,
            BindingTarget::ServiceAccount { account } => Some(ResourceRef::new(
                ResourceKind::ServiceAccount,
                account.clone(),
            )),
            BindingTarget::KmsKey { key, .. } => {
                Some(ResourceRef::new(ResourceKind::KmsKey, key.clone()))
            }
            BindingTarget::Bucket { name } => {
                Some(ResourceRef::new(ResourceKind::Bucket, name.clone()))
            }
            BindingTarget::Repository { name, .. } => Some(ResourceRef::new(
                ResourceKind::ArtifactRepository,
                name.clone(),
            )),
        }
    }
}

impl fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resource() {
            Some(r) => write!(f, "{}", r),
            None => f.write_str("project"),
        }
    }
}

/// One IAM grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSpec {
    pub target: BindingTarget,
    pub member: Member,
    pub role: String,
}

impl BindingSpec {
    pub fn new(target: BindingTarget, member: Member, role: impl Into<String>) -> Self {
        Self {
            target,
            member,
            role: role.into(),
        }
    }
}

impl fmt::Display for BindingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} on {}", self.member, self.role, self.target)
    }
}
