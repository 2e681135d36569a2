use std::collections::BTreeMap;

/// owner -> repository -> workflow file names
pub type WorkflowIndex = BTreeMap<String, BTreeMap<String, Vec<String>>>;

pub const UNKNOWN_SEVERITY: &str = "unknown";

/// One flattened row of the dashboard: a workflow file (or one version of it)
/// together with its size metrics and the number of findings reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingRecord {
    owner: String,
    repository: String,
    workflow: String,
    file: String,
    version: Option<String>,
    line_count: u64,
    jobs: u64,
    steps_per_job: f64,
    findings: u64,
    findings_per_line: f64,
    severities: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordMetrics {
    pub line_count: u64,
    pub jobs: u64,
    pub steps_per_job: f64,
}

impl FindingRecord {
    pub fn new(
        owner: &str,
        repository: &str,
        workflow: &str,
        file: &str,
        version: Option<String>,
        metrics: RecordMetrics,
        severities: BTreeMap<String, u64>,
    ) -> Self {
        let findings: u64 = severities.values().sum();
        FindingRecord {
            owner: owner.to_string(),
            repository: repository.to_string(),
            workflow: workflow.to_string(),
            file: file.to_string(),
            version,
            line_count: metrics.line_count,
            jobs: metrics.jobs,
            steps_per_job: metrics.steps_per_job.max(0.0),
            findings,
            findings_per_line: findings_per_line(findings, metrics.line_count),
            severities,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// File name inside `{owner}/{repository}/` the record was read from.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn line_count(&self) -> u64 {
        self.line_count
    }

    pub fn jobs(&self) -> u64 {
        self.jobs
    }

    pub fn steps_per_job(&self) -> f64 {
        self.steps_per_job
    }

    pub fn findings(&self) -> u64 {
        self.findings
    }

    pub fn findings_per_line(&self) -> f64 {
        self.findings_per_line
    }

    pub fn severities(&self) -> &BTreeMap<String, u64> {
        &self.severities
    }
}

pub fn findings_per_line(findings: u64, line_count: u64) -> f64 {
    if line_count == 0 {
        0.0
    } else {
        findings as f64 / line_count as f64
    }
}
