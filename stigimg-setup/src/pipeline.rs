//! Hand-off to the image build pipeline and its scan artifacts.
//!
//! The Cloud Build config and the Packer template it runs are opaque here;
//! this module only passes the resolved configuration along as
//! substitutions and inspects what the scan step uploaded.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::Configuration;
use crate::error::ProviderError;
use crate::plan::PACKER_SERVICE_ACCOUNT;
use crate::provider::GcloudProvider;
use crate::resource::service_account_email;

/// Image name used when the operator does not pick one.
pub fn default_image_name(now: DateTime<Utc>) -> String {
    format!("rhel-8-stig-{}", now.format("%Y%m%d-%H%M%S"))
}

/// Where the scan step uploads its artifacts for an image.
pub fn scan_prefix(config: &Configuration, image_name: &str) -> String {
    format!("gs://{}/{}/", config.bucket_name, image_name)
}

/// A `gcloud builds submit` invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source_dir: PathBuf,
    pub config_file: PathBuf,
    pub image_name: String,
}

impl BuildRequest {
    pub fn submit_args(&self, config: &Configuration) -> Vec<String> {
        let substitutions = [
            ("_ZONE", config.zone.clone()),
            ("_REGION", config.region.clone()),
            ("_BUCKET", config.bucket_name.clone()),
            ("_IMAGE_NAME", self.image_name.clone()),
            (
                "_PACKER_SA",
                service_account_email(PACKER_SERVICE_ACCOUNT, &config.project_id),
            ),
        ]
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");

        vec![
            "builds".into(),
            "submit".into(),
            self.source_dir.display().to_string(),
            format!("--config={}", self.config_file.display()),
            format!("--region={}", config.region),
            format!("--gcs-source-staging-dir=gs://{}/source", config.cloudbuild_bucket),
            format!("--substitutions={}", substitutions),
            format!("--project={}", config.project_id),
            "--quiet".into(),
        ]
    }
}

/// Submit the build and wait for it to finish.
pub async fn submit_build(
    gcloud: &GcloudProvider,
    config: &Configuration,
    request: &BuildRequest,
) -> Result<String, ProviderError> {
    info!(
        image = %request.image_name,
        config_file = %request.config_file.display(),
        "Submitting image build"
    );
    gcloud.run(&request.submit_args(config)).await
}

/// Scan artifacts found under an image's prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanArtifacts {
    pub report_html: Option<String>,
    pub results_xml: Option<String>,
    pub log: Option<String>,
    pub other: Vec<String>,
}

impl ScanArtifacts {
    /// Sort a `gcloud storage ls` listing by artifact type.
    pub fn from_listing(listing: &str) -> Self {
        let mut artifacts = ScanArtifacts::default();
        for uri in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let slot = if uri.ends_with(".html") {
                &mut artifacts.report_html
            } else if uri.ends_with(".xml") {
                &mut artifacts.results_xml
            } else if uri.ends_with(".log") {
                &mut artifacts.log
            } else {
                artifacts.other.push(uri.to_string());
                continue;
            };
            if slot.is_none() {
                *slot = Some(uri.to_string());
            } else {
                artifacts.other.push(uri.to_string());
            }
        }
        artifacts
    }

    /// Names of the expected artifact types that are absent.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.report_html.is_none() {
            missing.push("html report");
        }
        if self.results_xml.is_none() {
            missing.push("xml results");
        }
        if self.log.is_none() {
            missing.push("log");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// List the scan artifacts uploaded for `image_name`.
pub async fn list_scan_artifacts(
    gcloud: &GcloudProvider,
    config: &Configuration,
    image_name: &str,
) -> Result<ScanArtifacts, ProviderError> {
    let args: Vec<String> = vec![
        "storage".into(),
        "ls".into(),
        scan_prefix(config, image_name),
        format!("--project={}", config.project_id),
    ];
    match gcloud.run(&args).await {
        Ok(listing) => Ok(ScanArtifacts::from_listing(&listing)),
        // Nothing uploaded yet
        Err(ProviderError::NotFound(_)) => Ok(ScanArtifacts::default()),
        Err(e) => Err(e),
    }
}
