use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{trace, warn};

use crate::domain::WFVError;
use crate::record::{FindingRecord, RecordMetrics, UNKNOWN_SEVERITY};

const METADATA_KEY: &str = "metadata";

/// A workflow data file, resolved once by the presence of a top level `metadata` key.
#[derive(Debug)]
pub enum WorkflowDocument {
    Flat(FlatDocument),
    Versioned(VersionedDocument),
}

#[derive(Debug, Default, Deserialize)]
pub struct FlatDocument {
    #[serde(default)]
    pub line_count: Option<u64>,
    #[serde(default)]
    pub num_jobs: Option<u64>,
    #[serde(default)]
    pub steps_per_job: Option<Value>,
    #[serde(default)]
    pub findings: Option<Vec<Value>>,
    #[serde(default)]
    pub workflow: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct VersionMetadata {
    #[serde(default)]
    pub line_count: Option<u64>,
    #[serde(default)]
    pub num_jobs: Option<u64>,
    #[serde(default)]
    pub steps_per_job: Option<Value>,
    #[serde(default)]
    pub workflow: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionedDocument {
    pub metadata: BTreeMap<String, VersionMetadata>,
    // workflow name -> timestamp -> findings
    #[serde(flatten)]
    pub workflows: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
}

impl WorkflowDocument {
    pub fn parse(raw: &[u8]) -> Result<Self, WFVError> {
        let value: Value = serde_json::from_slice(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, WFVError> {
        let Value::Object(ref map) = value else {
            return Err(WFVError::MalformedDocument(
                "top level is not an object".to_string(),
            ));
        };
        if map.contains_key(METADATA_KEY) {
            Ok(WorkflowDocument::Versioned(serde_json::from_value(value)?))
        } else {
            Ok(WorkflowDocument::Flat(serde_json::from_value(value)?))
        }
    }

    /// Raw workflow definition text carried by the document, if any.
    /// A versioned document returns the text of `version`, or the latest text it has.
    pub fn workflow_text(&self, version: Option<&str>) -> Option<&str> {
        match self {
            WorkflowDocument::Flat(doc) => doc.workflow.as_deref(),
            WorkflowDocument::Versioned(doc) => version
                .and_then(|v| doc.metadata.get(v))
                .and_then(|m| m.workflow.as_deref())
                .or_else(|| {
                    doc.metadata
                        .values()
                        .rev()
                        .find_map(|m| m.workflow.as_deref())
                }),
        }
    }
}

impl VersionedDocument {
    // Metadata for the same timestamp, falling back to the latest one.
    fn metadata_for(&self, version: &str) -> Option<&VersionMetadata> {
        self.metadata
            .get(version)
            .or_else(|| self.metadata.values().next_back())
    }
}

/// Flatten a raw workflow file into records. A file that cannot be parsed is an error
/// for that file alone; the caller counts it and moves on.
pub fn normalize(
    raw: &[u8],
    owner: &str,
    repository: &str,
    file: &str,
) -> Result<Vec<FindingRecord>, WFVError> {
    let doc = WorkflowDocument::parse(raw)?;
    Ok(normalize_document(&doc, owner, repository, file))
}

pub fn normalize_document(
    doc: &WorkflowDocument,
    owner: &str,
    repository: &str,
    file: &str,
) -> Vec<FindingRecord> {
    match doc {
        WorkflowDocument::Flat(flat) => {
            let metrics = RecordMetrics {
                line_count: flat.line_count.unwrap_or(0),
                jobs: flat.num_jobs.unwrap_or(0),
                steps_per_job: average_steps(flat.steps_per_job.as_ref()),
            };
            let severities = count_severities(flat.findings.as_deref().unwrap_or_default());
            vec![FindingRecord::new(
                owner, repository, file, file, None, metrics, severities,
            )]
        }
        WorkflowDocument::Versioned(versioned) => {
            let mut records = Vec::new();
            for (workflow, versions) in versioned.workflows.iter() {
                for (version, findings) in versions.iter() {
                    let metrics = match versioned.metadata_for(version) {
                        Some(meta) => {
                            if !versioned.metadata.contains_key(version) {
                                trace!(
                                    "{owner}/{repository}/{file}: no metadata for {version}, using latest"
                                );
                            }
                            RecordMetrics {
                                line_count: meta.line_count.unwrap_or(0),
                                jobs: meta.num_jobs.unwrap_or(0),
                                steps_per_job: average_steps(meta.steps_per_job.as_ref()),
                            }
                        }
                        None => {
                            warn!("{owner}/{repository}/{file}: no metadata at all for {workflow}");
                            RecordMetrics::default()
                        }
                    };
                    records.push(FindingRecord::new(
                        owner,
                        repository,
                        workflow,
                        file,
                        Some(version.clone()),
                        metrics,
                        count_severities(findings),
                    ));
                }
            }
            records
        }
    }
}

/// Mean of a job-name -> step-count mapping. Anything unparsable counts as 0.
pub fn average_steps(steps: Option<&Value>) -> f64 {
    match steps {
        Some(Value::Object(map)) => mean_of_numbers(map.values()),
        Some(Value::String(s)) => average_steps_str(s),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0).max(0.0),
        _ => 0.0,
    }
}

/// Same as [`average_steps`] for a textual cell, either a plain number or a JSON mapping.
pub fn average_steps_str(s: &str) -> f64 {
    if let Ok(n) = s.trim().parse::<f64>() {
        return if n.is_finite() { n.max(0.0) } else { 0.0 };
    }
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => mean_of_numbers(map.values()),
        _ => 0.0,
    }
}

fn mean_of_numbers<'a>(values: impl Iterator<Item = &'a Value>) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        match v.as_f64() {
            Some(x) => {
                sum += x;
                n += 1;
            }
            None => return 0.0,
        }
    }
    if n == 0 { 0.0 } else { (sum / n as f64).max(0.0) }
}

fn count_severities(findings: &[Value]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for finding in findings {
        let severity = finding
            .get("severity")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SEVERITY)
            .to_lowercase();
        *counts.entry(severity).or_insert(0) += 1;
    }
    counts
}
