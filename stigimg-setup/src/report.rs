//! Per-step outcomes and the run summary.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tabled::{Table, Tabled};

use crate::error::ReconcileError;
use crate::resource::{BindingSpec, ResourceRef};

/// Outcome of one ensure or grant.
#[derive(Debug, Clone)]
pub enum ReconcileResult {
    Created,
    AlreadyExists,
    Failed(ReconcileError),
}

impl ReconcileResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, ReconcileResult::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReconcileResult::Created => "created",
            ReconcileResult::AlreadyExists => "already-exists",
            ReconcileResult::Failed(_) => "failed",
        }
    }
}

impl Serialize for ReconcileResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ReconcileResult", 2)?;
        s.serialize_field("status", self.label())?;
        match self {
            ReconcileResult::Failed(e) => s.serialize_field("error", &Some(e.to_string()))?,
            _ => s.serialize_field("error", &None::<String>)?,
        }
        s.end()
    }
}

/// What a step acted on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Subject {
    Resource(ResourceRef),
    Binding(BindingSpec),
}

/// One line of the report.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub subject: Subject,
    pub result: ReconcileResult,
}

/// Everything that happened during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepReport>,
    /// Set when the run stopped before executing any step.
    #[serde(serialize_with = "serialize_error")]
    pub aborted: Option<ReconcileError>,
}

fn serialize_error<S: Serializer>(
    err: &Option<ReconcileError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "SUBJECT")]
    subject: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
}

impl RunReport {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            aborted: None,
        }
    }

    pub fn push(&mut self, subject: Subject, result: ReconcileResult) {
        self.steps.push(StepReport { subject, result });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    fn resource_results(&self) -> impl Iterator<Item = &ReconcileResult> {
        self.steps.iter().filter_map(|s| match s.subject {
            Subject::Resource(_) => Some(&s.result),
            Subject::Binding(_) => None,
        })
    }

    pub fn resources_created(&self) -> usize {
        self.resource_results()
            .filter(|r| matches!(r, ReconcileResult::Created))
            .count()
    }

    pub fn resources_existing(&self) -> usize {
        self.resource_results()
            .filter(|r| matches!(r, ReconcileResult::AlreadyExists))
            .count()
    }

    pub fn bindings_applied(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| {
                matches!(s.subject, Subject::Binding(_))
                    && matches!(s.result, ReconcileResult::Created)
            })
            .count()
    }

    /// The error that ended the run, if any.
    pub fn failure(&self) -> Option<&ReconcileError> {
        self.aborted.as_ref().or_else(|| {
            self.steps.iter().find_map(|s| match &s.result {
                ReconcileResult::Failed(e) => Some(e),
                _ => None,
            })
        })
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// Render the summary block shown at the end of `apply`.
    pub fn render(&self) -> String {
        let rows: Vec<Row> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let (kind, subject) = match &s.subject {
                    Subject::Resource(r) => (r.kind.to_string(), r.name.clone()),
                    Subject::Binding(b) => (
                        "iam-binding".to_string(),
                        format!("{} {} on {}", b.member, b.role, b.target),
                    ),
                };
                let outcome = match &s.result {
                    ReconcileResult::Created if matches!(s.subject, Subject::Binding(_)) => {
                        "granted".green().to_string()
                    }
                    ReconcileResult::Created => "created".green().to_string(),
                    ReconcileResult::AlreadyExists => "exists".yellow().to_string(),
                    ReconcileResult::Failed(_) => "FAILED".red().bold().to_string(),
                };
                Row {
                    index: i + 1,
                    kind,
                    subject,
                    outcome,
                }
            })
            .collect();

        let mut out = Table::new(rows).to_string();
        out.push('\n');
        out.push_str(&format!(
            "{} created, {} already existed, {} bindings applied",
            self.resources_created(),
            self.resources_existing(),
            self.bindings_applied()
        ));
        if let Some(err) = self.failure() {
            out.push('\n');
            out.push_str(&format!("{} {}", "error:".red().bold(), err));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    #[test]
    fn test_counts_and_failure() {
        let mut report = RunReport::start();
        report.push(
            Subject::Resource(ResourceRef::new(ResourceKind::Network, "stig-network")),
            ReconcileResult::AlreadyExists,
        );
        report.push(
            Subject::Resource(ResourceRef::new(ResourceKind::FirewallRule, "fw")),
            ReconcileResult::Failed(ReconcileError::Provider {
                kind: "firewall-rule".into(),
                name: "fw".into(),
                message: "boom".into(),
            }),
        );
        report.finish();

        assert_eq!(report.resources_created(), 0);
        assert_eq!(report.resources_existing(), 1);
        assert!(!report.is_success());
        assert_eq!(
            report.failure().unwrap().to_string(),
            "provider error on firewall-rule fw: boom"
        );
        assert!(report.render().contains("stig-network"));
    }

    #[test]
    fn test_json_shape() {
        let mut report = RunReport::start();
        report.push(
            Subject::Resource(ResourceRef::new(ResourceKind::Bucket, "demo-stig-artifacts")),
            ReconcileResult::Created,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["result"]["status"], "created");
        assert_eq!(json["steps"][0]["subject"]["kind"], "bucket");
        assert!(json["aborted"].is_null());
    }
}
