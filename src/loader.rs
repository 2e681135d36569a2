use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, error, info, trace, warn};

use crate::domain::WFVError;
use crate::normalize::{WorkflowDocument, normalize};
use crate::record::{FindingRecord, WorkflowIndex};

pub const INDEX_FILE: &str = "workflow_index.json";

/// Everything the dashboard needs to know about a load run.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub records: Vec<FindingRecord>,
    /// Set when the workflow index itself could not be loaded.
    pub index_error: Option<String>,
    pub loaded_files: usize,
    /// Listed files that could not be read.
    pub skipped_files: usize,
    /// Files that were read but could not be parsed.
    pub malformed_files: usize,
}

/// Reads the static layout `{data_dir}/workflow_index.json` and `{data_dir}/{owner}/{repo}/{file}`.
#[derive(Debug, Clone)]
pub struct Loader {
    data_dir: PathBuf,
}

impl Loader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    pub fn workflow_path(&self, owner: &str, repository: &str, file: &str) -> PathBuf {
        self.data_dir.join(owner).join(repository).join(file)
    }

    pub fn load_index(&self) -> Result<WorkflowIndex, WFVError> {
        let raw = read_file(&self.index_path())?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn load_workflow_file(
        &self,
        owner: &str,
        repository: &str,
        file: &str,
    ) -> Result<Vec<u8>, WFVError> {
        read_file(&self.workflow_path(owner, repository, file))
    }

    /// Workflow text of a data file at `version`, or the pretty printed document if it carries none.
    pub fn load_workflow_text(
        &self,
        owner: &str,
        repository: &str,
        file: &str,
        version: Option<&str>,
    ) -> Result<String, WFVError> {
        let raw = self.load_workflow_file(owner, repository, file)?;
        if let Ok(doc) = WorkflowDocument::parse(&raw)
            && let Some(text) = doc.workflow_text(version)
        {
            return Ok(text.to_string());
        }
        let value: serde_json::Value = serde_json::from_slice(&raw)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Load every file listed in the index. Single files that fail are skipped.
    pub fn load_all_data(&self) -> LoadReport {
        let start_time = Instant::now();
        let mut report = LoadReport::default();

        // A missing or invalid index loads as an empty one.
        let index = self.load_index().unwrap_or_else(|e| {
            error!("Error loading {}: {e}", self.index_path().display());
            report.index_error = Some(format!("Failed to load {INDEX_FILE}: {e}"));
            WorkflowIndex::new()
        });

        // Files are read one after the other, parsing happens in parallel.
        let mut raw_files = Vec::new();
        for (owner, repositories) in index.iter() {
            for (repository, files) in repositories.iter() {
                for file in files.iter() {
                    match self.load_workflow_file(owner, repository, file) {
                        Ok(raw) => raw_files.push((owner, repository, file, raw)),
                        Err(e) => {
                            warn!("Skipping file {owner}/{repository}/{file}: {e}");
                            report.skipped_files += 1;
                        }
                    }
                }
            }
        }

        let batches: Vec<Result<Vec<FindingRecord>, WFVError>> = raw_files
            .par_iter()
            .map(|(owner, repository, file, raw)| {
                normalize(raw, owner, repository, file).inspect_err(|e| {
                    warn!("Skipping malformed file {owner}/{repository}/{file}: {e}");
                })
            })
            .collect();
        for batch in batches {
            match batch {
                Ok(records) => {
                    report.loaded_files += 1;
                    report.records.extend(records);
                }
                Err(_) => report.malformed_files += 1,
            }
        }

        info!(
            "Loaded {} records from {} files ({} skipped, {} malformed) in {}ms",
            report.records.len(),
            report.loaded_files,
            report.skipped_files,
            report.malformed_files,
            start_time.elapsed().as_millis()
        );
        report
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, WFVError> {
    trace!("Reading {}", path.display());
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => WFVError::FileNotFound(path.to_path_buf()),
        ErrorKind::PermissionDenied => WFVError::PermissionDenied(path.to_path_buf()),
        _ => WFVError::IoError(e),
    })
}

/// Build an index from the `{owner}/{repo}/*.json` directory layout.
pub fn build_index(data_dir: &Path) -> Result<WorkflowIndex, WFVError> {
    let mut index = WorkflowIndex::new();
    for owner in sorted_dir_entries(data_dir)? {
        if !owner.is_dir() {
            continue;
        }
        let owner_name = file_name(&owner);
        let repositories = index.entry(owner_name.clone()).or_default();

        for repository in sorted_dir_entries(&owner)? {
            if !repository.is_dir() {
                continue;
            }
            let files: Vec<String> = sorted_dir_entries(&repository)?
                .iter()
                .filter(|p| p.is_file())
                .map(|p| file_name(p))
                .filter(|name| name.ends_with(".json") && name != INDEX_FILE)
                .collect();
            if !files.is_empty() {
                debug!("{owner_name}/{}: {} workflow files", file_name(&repository), files.len());
                repositories.insert(file_name(&repository), files);
            }
        }
    }
    Ok(index)
}

pub fn write_index(data_dir: &Path, index: &WorkflowIndex) -> Result<PathBuf, WFVError> {
    let path = data_dir.join(INDEX_FILE);
    fs::write(&path, serde_json::to_string_pretty(index)?)?;
    info!("Workflow index saved to {}", path.display());
    Ok(path)
}

fn sorted_dir_entries(dir: &Path) -> Result<Vec<PathBuf>, WFVError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => WFVError::FileNotFound(dir.to_path_buf()),
            _ => WFVError::IoError(e),
        })?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<PathBuf>, _>>()?;
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("???")
        .to_string()
}
