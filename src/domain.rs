use std::fmt;
use std::io::Error;
use std::path::PathBuf;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;

// Custom error type used across loading, parsing and rendering.
#[derive(Debug)]
pub enum WFVError {
    IoError(Error),
    PolarsError(PolarsError),
    JsonError(serde_json::Error),
    LoadingFailed(String),
    MalformedDocument(String),
    FileNotFound(PathBuf),
    PermissionDenied(PathBuf),
}

impl fmt::Display for WFVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WFVError::IoError(e) => write!(f, "io error: {e}"),
            WFVError::PolarsError(e) => write!(f, "polars error: {e}"),
            WFVError::JsonError(e) => write!(f, "invalid json: {e}"),
            WFVError::LoadingFailed(msg) => write!(f, "loading failed: {msg}"),
            WFVError::MalformedDocument(msg) => write!(f, "malformed document: {msg}"),
            WFVError::FileNotFound(p) => write!(f, "file not found: {}", p.display()),
            WFVError::PermissionDenied(p) => write!(f, "permission denied: {}", p.display()),
        }
    }
}

impl std::error::Error for WFVError {}

impl From<Error> for WFVError {
    fn from(err: Error) -> Self {
        WFVError::IoError(err)
    }
}

impl From<PolarsError> for WFVError {
    fn from(err: PolarsError) -> Self {
        WFVError::PolarsError(err)
    }
}

impl From<serde_json::Error> for WFVError {
    fn from(err: serde_json::Error) -> Self {
        WFVError::JsonError(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    /// workflow_index.json plus one JSON document per workflow file
    Json,
    /// findings.parquet joined with workflow_metadata.parquet
    Parquet,
}

pub const ROWS_PER_PAGE_OPTIONS: [usize; 4] = [10, 25, 50, 100];

#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct WFVConfig {
    pub data_dir: PathBuf,
    pub source: SourceKind,
    pub rows_per_page: usize,
    pub histogram_bins: usize,
    #[setters(strip_option)]
    pub repository: Option<String>,
    pub event_poll_time: u64,
}

impl Default for WFVConfig {
    fn default() -> Self {
        WFVConfig {
            data_dir: PathBuf::from("data"),
            source: SourceKind::Json,
            rows_per_page: ROWS_PER_PAGE_OPTIONS[0],
            histogram_bins: 10,
            repository: None,
            event_poll_time: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CMDMode {
    FilterByRepository,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    PrevPage,
    NextPage,
    FirstPage,
    LastPage,
    CycleRowsPerPage,
    NextRepository,
    PrevRepository,
    ClearFilter,
    Filter,
    ToggleCharts,
    Enter,
    Exit,
    CopyRow,
    Help,
    Resize(usize, usize),
    RawKey(KeyEvent),
}

pub const HELP_TEXT: &str = "\
 Navigation
   j / Down        next row
   k / Up          previous row
   l / Right / n   next page
   h / Left / p    previous page
   g / G           first / last page
   r               cycle rows per page (10, 25, 50, 100)

 Filter
   f / F           next / previous repository
   /               type a repository name (Tab completes, empty clears)
   x               clear filter

 Views
   Enter           show the workflow of the selected row
   c               toggle charts
   y               copy selected row as csv
   ?               this help
   Esc             close popup / go back
   q               quit
";
