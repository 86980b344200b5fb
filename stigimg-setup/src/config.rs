//! Run configuration.
//!
//! [`ConfigInputs`] holds what the operator supplied (flags, environment,
//! prompts). [`Configuration`] is the resolved, immutable value passed by
//! reference through a run.

use serde::Serialize;

use crate::error::ConfigError;

pub const DEFAULT_ZONE: &str = "us-central1-c";

/// Raw configuration as supplied by the operator.
#[derive(Debug, Clone, Default)]
pub struct ConfigInputs {
    pub project_id: Option<String>,
    pub zone: Option<String>,
    pub region: Option<String>,
    pub bucket_name: Option<String>,
    pub cloudbuild_bucket: Option<String>,
}

/// Resolved configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Configuration {
    pub project_id: String,
    pub project_number: String,
    pub zone: String,
    pub region: String,
    pub bucket_name: String,
    pub cloudbuild_bucket: String,
}

/// Strip the zone suffix: `us-central1-c` -> `us-central1`.
pub fn region_from_zone(zone: &str) -> Result<String, ConfigError> {
    match zone.rsplit_once('-') {
        Some((region, suffix)) if !region.is_empty() && !suffix.is_empty() => {
            Ok(region.to_string())
        }
        _ => Err(ConfigError::InvalidZone(zone.to_string())),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ConfigInputs {
    /// The project ID, if one was supplied.
    pub fn project_id(&self) -> Option<&str> {
        non_empty(&self.project_id)
    }

    /// Resolve defaults and derived values. The project number is looked up
    /// by the caller exactly once and passed in here.
    pub fn resolve(&self, project_number: &str) -> Result<Configuration, ConfigError> {
        let project_id = self
            .project_id()
            .ok_or(ConfigError::MissingProjectId)?
            .to_string();

        let project_number = project_number.trim().to_string();
        if project_number.is_empty() || !project_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidProjectNumber(project_number));
        }

        let zone = non_empty(&self.zone).unwrap_or(DEFAULT_ZONE).to_string();
        let region = match non_empty(&self.region) {
            Some(region) => region.to_string(),
            None => region_from_zone(&zone)?,
        };

        let bucket_name = non_empty(&self.bucket_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-stig-artifacts", project_id));
        let cloudbuild_bucket = non_empty(&self.cloudbuild_bucket)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_cloudbuild", project_id));

        Ok(Configuration {
            project_id,
            project_number,
            zone,
            region,
            bucket_name,
            cloudbuild_bucket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_from_zone() {
        assert_eq!(region_from_zone("us-central1-c").unwrap(), "us-central1");
        assert_eq!(region_from_zone("europe-west4-a").unwrap(), "europe-west4");
        assert!(region_from_zone("uscentral").is_err());
        assert!(region_from_zone("us-").is_err());
    }

    #[test]
    fn test_defaults() {
        let inputs = ConfigInputs {
            project_id: Some("demo".into()),
            zone: Some("us-central1-c".into()),
            ..Default::default()
        };
        let config = inputs.resolve("123456789").unwrap();
        assert_eq!(config.region, "us-central1");
        assert_eq!(config.bucket_name, "demo-stig-artifacts");
        assert_eq!(config.cloudbuild_bucket, "demo_cloudbuild");
        assert_eq!(config.project_number, "123456789");
    }

    #[test]
    fn test_zone_defaults_when_unset() {
        let inputs = ConfigInputs {
            project_id: Some("demo".into()),
            zone: Some("  ".into()),
            ..Default::default()
        };
        let config = inputs.resolve("1").unwrap();
        assert_eq!(config.zone, DEFAULT_ZONE);
        assert_eq!(config.region, "us-central1");
    }

    #[test]
    fn test_explicit_values_win() {
        let inputs = ConfigInputs {
            project_id: Some("demo".into()),
            zone: Some("europe-west4-a".into()),
            region: Some("europe-west1".into()),
            bucket_name: Some("artifacts".into()),
            cloudbuild_bucket: Some("builds".into()),
        };
        let config = inputs.resolve("42").unwrap();
        assert_eq!(config.region, "europe-west1");
        assert_eq!(config.bucket_name, "artifacts");
        assert_eq!(config.cloudbuild_bucket, "builds");
    }

    #[test]
    fn test_missing_project() {
        assert_eq!(
            ConfigInputs::default().resolve("1"),
            Err(ConfigError::MissingProjectId)
        );
    }

    #[test]
    fn test_project_number_must_be_numeric() {
        let inputs = ConfigInputs {
            project_id: Some("demo".into()),
            ..Default::default()
        };
        assert_eq!(
            inputs.resolve("(unset)"),
            Err(ConfigError::InvalidProjectNumber("(unset)".into()))
        );
    }
}
