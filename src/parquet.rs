use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use polars::prelude::*;
use tracing::{debug, error, info, trace, warn};

use crate::domain::WFVError;
use crate::loader::LoadReport;
use crate::normalize::average_steps_str;
use crate::record::{FindingRecord, RecordMetrics, UNKNOWN_SEVERITY};

pub const FINDINGS_FILE: &str = "findings.parquet";
pub const METADATA_FILE: &str = "workflow_metadata.parquet";

// (repo_name, workflow_name, version_ts) identifies one workflow version in both tables
const JOIN_KEYS: [&str; 3] = ["repo_name", "workflow_name", "version_ts"];
const HAS_METADATA: &str = "has_metadata";

struct Accumulator {
    // None for findings whose version has no metadata row
    metrics: Option<RecordMetrics>,
    severities: BTreeMap<String, u64>,
}

/// Loads the findings table joined with the workflow metadata table.
pub struct ParquetSource {
    findings: PathBuf,
    metadata: PathBuf,
    repository: Option<String>,
}

impl ParquetSource {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            findings: data_dir.join(FINDINGS_FILE),
            metadata: data_dir.join(METADATA_FILE),
            repository: None,
        }
    }

    /// Restrict the scan to one `repo_name` value.
    pub fn with_repository(mut self, repository: Option<String>) -> Self {
        self.repository = repository;
        self
    }

    fn scan(path: &Path) -> Result<LazyFrame, WFVError> {
        if !path.is_file() {
            return Err(WFVError::FileNotFound(path.to_path_buf()));
        }
        Ok(LazyFrame::scan_parquet(
            PlPath::Local(path.into()),
            ScanArgsParquet::default(),
        )?)
    }

    fn restrict(&self, frame: LazyFrame) -> LazyFrame {
        match &self.repository {
            Some(repo) => frame.filter(col("repo_name").eq(lit(repo.as_str()))),
            None => frame,
        }
    }

    /// Full join of both tables. Versions without findings keep a row with a null
    /// `rule_id`, findings without a metadata row keep a row with a null `has_metadata`.
    pub fn joined(&self) -> Result<DataFrame, WFVError> {
        let metadata = self
            .restrict(Self::scan(&self.metadata)?)
            .with_column(lit(true).alias(HAS_METADATA));
        let findings = self.restrict(Self::scan(&self.findings)?);

        let keys: Vec<Expr> = JOIN_KEYS.iter().map(|k| col(*k)).collect();
        let args = JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns);
        let frame = metadata
            .join(findings, keys.clone(), keys, args)
            .select([
                col("repo_name").cast(DataType::String),
                col("workflow_name").cast(DataType::String),
                col("version_ts").cast(DataType::String),
                col("line_count").cast(DataType::Int64),
                col("num_jobs").cast(DataType::Int64),
                col("steps_per_job").cast(DataType::String),
                col("rule_id").cast(DataType::String),
                col("severity").cast(DataType::String),
                col(HAS_METADATA).cast(DataType::Boolean),
            ]);
        Ok(frame.collect()?)
    }

    pub fn load_records(&self) -> Result<Vec<FindingRecord>, WFVError> {
        let start_time = Instant::now();
        let df = self.joined()?;
        debug!("Joined frame has {} rows", df.height());

        let repo_names = df.column("repo_name")?.str()?;
        let workflows = df.column("workflow_name")?.str()?;
        let versions = df.column("version_ts")?.str()?;
        let line_counts = df.column("line_count")?.i64()?;
        let jobs = df.column("num_jobs")?.i64()?;
        let steps = df.column("steps_per_job")?.str()?;
        let rules = df.column("rule_id")?.str()?;
        let severities = df.column("severity")?.str()?;
        let has_metadata = df.column(HAS_METADATA)?.bool()?;

        let mut grouped: BTreeMap<(String, String, String), Accumulator> = BTreeMap::new();
        for idx in 0..df.height() {
            let key = (
                repo_names.get(idx).unwrap_or_default().to_string(),
                workflows.get(idx).unwrap_or_default().to_string(),
                versions.get(idx).unwrap_or_default().to_string(),
            );
            let acc = grouped.entry(key).or_insert_with(|| Accumulator {
                metrics: None,
                severities: BTreeMap::new(),
            });
            if acc.metrics.is_none() && has_metadata.get(idx).unwrap_or(false) {
                acc.metrics = Some(RecordMetrics {
                    line_count: line_counts.get(idx).unwrap_or(0).max(0) as u64,
                    jobs: jobs.get(idx).unwrap_or(0).max(0) as u64,
                    steps_per_job: steps.get(idx).map(average_steps_str).unwrap_or(0.0),
                });
            }
            // a row without rule_id is a workflow version without findings
            if rules.get(idx).is_some() {
                let severity = severities
                    .get(idx)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(UNKNOWN_SEVERITY)
                    .to_lowercase();
                *acc.severities.entry(severity).or_insert(0) += 1;
            }
        }

        // Latest metadata per (repo_name, workflow_name). Keys iterate in version order.
        let mut latest: BTreeMap<(String, String), RecordMetrics> = BTreeMap::new();
        for ((repo_name, workflow, _), acc) in grouped.iter() {
            if let Some(metrics) = &acc.metrics {
                latest.insert((repo_name.clone(), workflow.clone()), metrics.clone());
            }
        }

        let mut unmatched = 0;
        let mut records = Vec::with_capacity(grouped.len());
        for ((repo_name, workflow, version), acc) in grouped {
            let metrics = match acc.metrics {
                Some(metrics) => metrics,
                None => {
                    unmatched += 1;
                    match latest.get(&(repo_name.clone(), workflow.clone())) {
                        Some(metrics) => {
                            trace!("{repo_name}/{workflow}: no metadata for {version}, using latest");
                            metrics.clone()
                        }
                        None => {
                            warn!("{repo_name}/{workflow}: no metadata at all, metrics are zero");
                            RecordMetrics::default()
                        }
                    }
                }
            };
            let (owner, repository) = repo_name.split_once('/').unwrap_or(("", repo_name.as_str()));
            let version = (!version.is_empty()).then_some(version.clone());
            records.push(FindingRecord::new(
                owner,
                repository,
                &workflow,
                &workflow,
                version,
                metrics,
                acc.severities,
            ));
        }
        if unmatched > 0 {
            warn!("{unmatched} workflow versions have findings but no metadata row");
        }

        info!(
            "Loaded {} records from parquet in {}ms",
            records.len(),
            start_time.elapsed().as_millis()
        );
        Ok(records)
    }

    /// Same shape as the json loader. Only a failure to read the tables is reported.
    pub fn load_all_data(&self) -> LoadReport {
        match self.load_records() {
            Ok(records) => LoadReport {
                loaded_files: 2,
                records,
                ..LoadReport::default()
            },
            Err(e) => {
                error!("Error loading parquet data: {e}");
                LoadReport {
                    index_error: Some(format!("Failed to load parquet data: {e}")),
                    ..LoadReport::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn write(path: &Path, mut df: DataFrame) {
        let mut file = File::create(path).unwrap();
        ParquetWriter::new(&mut file).finish(&mut df).unwrap();
    }

    fn fixture_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join(METADATA_FILE),
            df!(
                "repo_name" => ["acme/svc", "acme/svc", "acme/other"],
                "workflow_name" => ["ci.yml", "ci.yml", "release.yml"],
                "version_ts" => ["2024-05-01", "2024-06-01", "2024-06-01"],
                "line_count" => [100i64, 50, 20],
                "num_jobs" => [2i64, 1, 1],
                "steps_per_job" => ["{\"build\": 4, \"test\": 6}", "3", "{}"],
            )
            .unwrap(),
        );
        write(
            &dir.path().join(FINDINGS_FILE),
            df!(
                "repo_name" => ["acme/svc", "acme/svc", "acme/svc"],
                "workflow_name" => ["ci.yml", "ci.yml", "ci.yml"],
                "rule_id" => ["unpinned-uses", "template-injection", "artipacked"],
                "severity" => ["Medium", "high", "low"],
                "message" => ["a", "b", "c"],
                "version_ts" => ["2024-05-01", "2024-05-01", "2024-06-01"],
            )
            .unwrap(),
        );
        dir
    }

    #[test]
    fn join_keeps_workflows_without_findings() {
        let dir = fixture_dir();
        let records = ParquetSource::new(dir.path()).load_records().unwrap();
        assert_eq!(records.len(), 3);

        let other = &records[0];
        assert_eq!(other.owner(), "acme");
        assert_eq!(other.repository(), "other");
        assert_eq!(other.findings(), 0);
        assert_eq!(other.findings_per_line(), 0.0);

        let first = &records[1];
        assert_eq!(first.repository(), "svc");
        assert_eq!(first.workflow(), "ci.yml");
        assert_eq!(first.version(), Some("2024-05-01"));
        assert_eq!(first.findings(), 2);
        assert_eq!(first.steps_per_job(), 5.0);
        assert_eq!(first.findings_per_line(), 0.02);
        assert_eq!(first.severities().get("medium"), Some(&1));

        let second = &records[2];
        assert_eq!(second.findings(), 1);
        assert_eq!(second.steps_per_job(), 3.0);
    }

    #[test]
    fn repository_restriction_is_applied_in_the_scan() {
        let dir = fixture_dir();
        let records = ParquetSource::new(dir.path())
            .with_repository(Some("acme/other".to_string()))
            .load_records()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].repository(), "other");

        // quotes in the value are data, not query text
        let records = ParquetSource::new(dir.path())
            .with_repository(Some("acme/svc' OR '1'='1".to_string()))
            .load_records()
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn findings_without_metadata_use_latest_version() {
        let dir = fixture_dir();
        write(
            &dir.path().join(FINDINGS_FILE),
            df!(
                "repo_name" => ["acme/svc", "acme/svc", "acme/lost"],
                "workflow_name" => ["ci.yml", "ci.yml", "deploy.yml"],
                "rule_id" => ["unpinned-uses", "excessive-permissions", "artipacked"],
                "severity" => ["medium", "high", ""],
                "message" => ["a", "b", "c"],
                "version_ts" => ["2024-05-01", "2024-07-01", "2024-07-01"],
            )
            .unwrap(),
        );
        let records = ParquetSource::new(dir.path()).load_records().unwrap();
        assert_eq!(records.len(), 5);

        let lost = &records[0];
        assert_eq!(lost.repository(), "lost");
        assert_eq!(lost.findings(), 1);
        assert_eq!(lost.line_count(), 0);
        assert_eq!(lost.severities().get(UNKNOWN_SEVERITY), Some(&1));

        let unmatched = records
            .iter()
            .find(|r| r.version() == Some("2024-07-01") && r.repository() == "svc")
            .unwrap();
        assert_eq!(unmatched.findings(), 1);
        assert_eq!(unmatched.line_count(), 50);
        assert_eq!(unmatched.steps_per_job(), 3.0);
        assert_eq!(unmatched.severities().get("high"), Some(&1));
    }

    #[test]
    fn missing_tables_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let report = ParquetSource::new(dir.path()).load_all_data();
        assert!(report.records.is_empty());
        assert!(report.index_error.is_some());
    }
}
