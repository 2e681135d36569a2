use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::charts::ChartSet;
use crate::domain::{CMDMode, HELP_TEXT, Message, WFVConfig, WFVError};
use crate::inputter::{InputResult, Inputter};
use crate::loader::{LoadReport, Loader};
use crate::record::FindingRecord;
use crate::session::{Rerender, Session};
use crate::stats::{Correlations, Stats, compute_correlations, compute_stats};
use crate::table::{ColumnView, page_columns, record_as_csv};

#[derive(Debug, PartialEq)]
pub enum Status {
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    TABLE,
    CHARTS,
    POPUP,
    CMDINPUT,
}

/// Snapshot of everything the UI renders. Rebuilt by the model after each update.
pub struct UIData {
    pub name: String,
    pub table: Vec<ColumnView>,
    pub selected_row: Option<usize>,
    pub pagination: String,
    pub page: usize,
    pub pages: usize,
    pub rows_per_page: usize,
    pub filter: Option<String>,
    pub stats: Stats,
    pub correlations: Correlations,
    pub charts: Arc<ChartSet>,
    pub show_charts: bool,
    pub show_popup: bool,
    pub popup_title: String,
    pub popup_message: String,
    pub error_banner: Option<String>,
    pub cmdinput: InputResult,
    pub cmd_mode: Option<CMDMode>,
    pub active_cmdinput: bool,
    pub status_message: String,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            table: Vec::new(),
            selected_row: None,
            pagination: String::new(),
            page: 1,
            pages: 0,
            rows_per_page: 0,
            filter: None,
            stats: Stats::default(),
            correlations: Correlations::default(),
            charts: Arc::new(ChartSet::default()),
            show_charts: false,
            show_popup: false,
            popup_title: String::new(),
            popup_message: String::new(),
            error_banner: None,
            cmdinput: InputResult::default(),
            cmd_mode: None,
            active_cmdinput: false,
            status_message: String::new(),
        }
    }
}

pub struct Model {
    config: WFVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    session: Session,
    loader: Option<Loader>,
    stats: Stats,
    correlations: Correlations,
    charts: Arc<ChartSet>,
    curser_row: usize,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    status_message: String,
    error_banner: Option<String>,
}

impl Model {
    /// Build the model from a finished load. `loader` is used to open raw workflow files.
    pub fn init(config: &WFVConfig, report: LoadReport, loader: Option<Loader>) -> Self {
        let status_message = match &report.index_error {
            Some(_) => "Loading failed".to_string(),
            None => format!(
                "Loaded {} records from {} files, {} skipped, {} malformed",
                report.records.len(),
                report.loaded_files,
                report.skipped_files,
                report.malformed_files
            ),
        };
        let session = Session::new(Arc::new(report.records), config.rows_per_page);

        let mut model = Self {
            config: config.clone(),
            status: Status::READY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            session,
            loader,
            stats: Stats::default(),
            correlations: Correlations::default(),
            charts: Arc::new(ChartSet::default()),
            curser_row: 0,
            uidata: UIData::empty(),
            clipboard: None,
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            status_message,
            error_banner: report.index_error,
        };

        // Only the json source filters in memory, parquet already restricted its scan.
        let initial_filter = match &model.loader {
            Some(_) => config.repository.clone(),
            None => None,
        };
        let rerender = model.session.set_filter(initial_filter.as_deref());
        model.rerender(rerender);
        model
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.uidata.status_message = self.status_message.clone();
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), WFVError> {
        let Some(msg) = message else {
            return Ok(());
        };
        trace!("Update: Modus {:?}, Message {:?}", self.modus, msg);

        match self.modus {
            Modus::TABLE | Modus::CHARTS => match msg {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_selection_down(),
                Message::MoveUp => self.move_selection_up(),
                Message::PrevPage => self.transition(|s| s.prev_page()),
                Message::NextPage => self.transition(|s| s.next_page()),
                Message::FirstPage => self.transition(|s| s.first_page()),
                Message::LastPage => self.transition(|s| s.last_page_jump()),
                Message::CycleRowsPerPage => self.transition(|s| s.cycle_rows_per_page()),
                Message::NextRepository => self.transition(|s| s.cycle_repository(true)),
                Message::PrevRepository => self.transition(|s| s.cycle_repository(false)),
                Message::ClearFilter => self.transition(|s| s.set_filter(None)),
                Message::Filter => self.enter_cmd_mode(CMDMode::FilterByRepository),
                Message::ToggleCharts => self.toggle_charts(),
                Message::Enter => self.show_selected_workflow(),
                Message::Exit => self.exit(),
                Message::CopyRow => self.copy_selected_row(),
                Message::Help => self.show_popup("Help", HELP_TEXT.to_string()),
                Message::Resize(width, height) => {
                    trace!("UI was resized to {width}x{height}");
                }
                Message::RawKey(_) => (),
            },
            Modus::POPUP => match msg {
                Message::Quit => self.quit(),
                Message::Exit | Message::Enter => self.exit(),
                _ => (),
            },
            Modus::CMDINPUT => {
                if let Message::RawKey(key) = msg {
                    self.raw_input(key)
                }
            }
        }
        Ok(())
    }

    // -------------------- State transitions ---------------------- //

    fn transition(&mut self, step: impl FnOnce(&mut Session) -> Rerender) {
        let rerender = step(&mut self.session);
        if rerender.any() {
            self.rerender(rerender);
        } else {
            trace!("Transition was a no-op");
        }
    }

    fn rerender(&mut self, rerender: Rerender) {
        if rerender.stats {
            self.stats = compute_stats(self.session.filtered_records());
            self.correlations = compute_correlations(self.session.filtered_records());
        }
        if rerender.charts {
            // Drop the previous chart set and build a new one for the current filter.
            self.charts = Arc::new(ChartSet::build(
                self.session.filtered_records(),
                self.config.histogram_bins,
            ));
        }
        if rerender.table {
            self.curser_row = 0;
        }
        self.update_uidata();
    }

    fn update_uidata(&mut self) {
        let page = self.session.page_records();
        let selected_row = (!page.is_empty()).then_some(self.curser_row);
        let name = match self.session.filter() {
            Some(repo) => format!("F[{repo}]"),
            None => "all repositories".to_string(),
        };

        self.uidata = UIData {
            name,
            table: page_columns(&page),
            selected_row,
            pagination: self.session.pagination_info(),
            page: self.session.current_page(),
            pages: self.session.page_count(),
            rows_per_page: self.session.rows_per_page(),
            filter: self.session.filter().map(|f| f.to_string()),
            stats: self.stats,
            correlations: self.correlations,
            charts: Arc::clone(&self.charts),
            show_charts: self.modus == Modus::CHARTS
                || (self.modus != Modus::TABLE && self.previous_modus == Modus::CHARTS),
            show_popup: self.modus == Modus::POPUP,
            popup_title: std::mem::take(&mut self.uidata.popup_title),
            popup_message: std::mem::take(&mut self.uidata.popup_message),
            error_banner: self.error_banner.clone(),
            cmdinput: self.last_input.clone(),
            cmd_mode: self.cmd_mode,
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
        };
    }

    fn selected_record(&self) -> Option<&FindingRecord> {
        self.session.page_records().get(self.curser_row).copied()
    }

    fn move_selection_down(&mut self) {
        let rows = self.session.page_range().len();
        if self.curser_row + 1 < rows {
            self.curser_row += 1;
            self.update_uidata();
        }
    }

    fn move_selection_up(&mut self) {
        if self.curser_row > 0 {
            self.curser_row -= 1;
            self.update_uidata();
        }
    }

    fn toggle_charts(&mut self) {
        self.modus = match self.modus {
            Modus::CHARTS => Modus::TABLE,
            _ => Modus::CHARTS,
        };
        self.previous_modus = self.modus;
        self.update_uidata();
    }

    fn show_popup(&mut self, title: &str, message: String) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.uidata.popup_title = title.to_string();
        self.uidata.popup_message = message;
        self.update_uidata();
    }

    fn exit(&mut self) {
        match self.modus {
            Modus::POPUP => {
                trace!("Close popup ...");
                self.modus = self.previous_modus;
                self.uidata.popup_title.clear();
                self.uidata.popup_message.clear();
                self.update_uidata();
            }
            Modus::CHARTS => self.toggle_charts(),
            Modus::TABLE | Modus::CMDINPUT => {}
        }
    }

    fn show_selected_workflow(&mut self) {
        let Some(record) = self.selected_record() else {
            return;
        };
        let title = format!("{}/{}/{}", record.owner(), record.repository(), record.file());
        let content = match &self.loader {
            Some(loader) => {
                match loader.load_workflow_text(
                    record.owner(),
                    record.repository(),
                    record.file(),
                    record.version(),
                ) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to load workflow {title}: {e}");
                        format!("Failed to load workflow: {e}")
                    }
                }
            }
            None => describe_record(record),
        };
        self.show_popup(&title, content);
    }

    fn copy_selected_row(&mut self) {
        let Some(row) = self.selected_record().map(record_as_csv) else {
            return;
        };
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => self.clipboard = Some(clipboard),
                Err(e) => {
                    warn!("Clipboard unavailable: {e:?}");
                    self.set_status_message("Clipboard unavailable");
                    return;
                }
            }
        }
        if let Some(clipboard) = self.clipboard.as_mut() {
            match clipboard.set_text(row) {
                Ok(_) => {
                    trace!("Copied row to clipboard.");
                    self.set_status_message("Copied row to clipboard");
                }
                Err(e) => debug!("Error copying to clipboard: {:?}", e),
            }
        }
    }

    // -------------------- Command line ---------------------- //

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode ...");
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);

        self.active_cmdinput = true;
        self.input.clear();
        self.last_input = self.input.get();
        self.update_uidata();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if !self.active_cmdinput {
            return;
        }
        self.last_input = self.input.read(key);
        if self.last_input.wants_completion {
            if let Some(repo) = self.session.complete_repository(&self.last_input.input) {
                let repo = repo.to_string();
                self.last_input = self.input.complete(&repo);
            }
        }
        if self.last_input.finished {
            self.handle_cmd_input();
        }
        self.update_uidata();
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {}", self.last_input.input);
        self.active_cmdinput = false;
        self.modus = self.previous_modus;

        let cmd_input = self.last_input.input.trim().to_string();
        let canceled = self.last_input.canceled;
        self.last_input = InputResult::default();

        match self.cmd_mode.take() {
            Some(CMDMode::FilterByRepository) if !canceled => {
                if cmd_input.is_empty() {
                    self.transition(|s| s.set_filter(None));
                    self.set_status_message("Filter cleared");
                } else if self.session.repositories().contains(&cmd_input) {
                    self.transition(|s| s.set_filter(Some(cmd_input.as_str())));
                    self.set_status_message(format!(
                        "Showing {} workflows of {cmd_input}",
                        self.session.filtered_len()
                    ));
                } else {
                    info!("Unknown repository {cmd_input}");
                    self.set_status_message(format!("Unknown repository {cmd_input}"));
                }
            }
            _ => {}
        }
    }
}

fn describe_record(record: &FindingRecord) -> String {
    let mut text = format!(
        "repository: {}/{}\nworkflow: {}\nversion: {}\nline_count: {}\njobs: {}\nsteps_per_job: {:.1}\nfindings: {}\nfindings_per_line: {:.4}\n",
        record.owner(),
        record.repository(),
        record.workflow(),
        record.version().unwrap_or("-"),
        record.line_count(),
        record.jobs(),
        record.steps_per_job(),
        record.findings(),
        record.findings_per_line(),
    );
    for (severity, count) in record.severities() {
        text.push_str(&format!("  {severity}: {count}\n"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::NO_DATA;
    use ratatui::crossterm::event::{KeyCode, KeyModifiers};
    use std::path::Path;

    fn fixture_loader() -> Loader {
        Loader::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/data"))
    }

    fn fixture_model(config: WFVConfig) -> Model {
        let loader = fixture_loader();
        let report = loader.load_all_data();
        Model::init(&config, report, Some(loader))
    }

    fn key(model: &mut Model, code: KeyCode) {
        model
            .update(Some(Message::RawKey(KeyEvent::new(code, KeyModifiers::NONE))))
            .unwrap();
    }

    #[test]
    fn initial_state_shows_everything() {
        let model = fixture_model(WFVConfig::default());
        let ui = model.get_uidata();
        assert_eq!(ui.page, 1);
        assert_eq!(ui.pages, 1);
        assert_eq!(ui.filter, None);
        assert_eq!(ui.stats.total_count, 4);
        assert_eq!(ui.stats.total_findings, 6);
        assert_eq!(ui.pagination, "Showing 1 to 4 of 4 entries");
        assert_eq!(ui.selected_row, Some(0));
        assert!(ui.error_banner.is_none());
        assert!(!ui.charts.is_empty());
    }

    #[test]
    fn repository_filter_resets_page_and_updates_stats() {
        let mut model = fixture_model(WFVConfig::default().with_rows_per_page(2));
        model.update(Some(Message::NextPage)).unwrap();
        assert_eq!(model.get_uidata().page, 2);

        // dropdown order is alphabetical: other, svc
        model.update(Some(Message::NextRepository)).unwrap();
        model.update(Some(Message::NextRepository)).unwrap();
        let ui = model.get_uidata();
        assert_eq!(ui.filter.as_deref(), Some("svc"));
        assert_eq!(ui.page, 1);
        assert_eq!(ui.stats.total_count, 3);
        assert!(ui.table[0].data.iter().all(|repo| repo == "svc"));
    }

    #[test]
    fn rows_per_page_only_rebuilds_the_table() {
        let mut model = fixture_model(WFVConfig::default());
        let charts_before = Arc::clone(&model.get_uidata().charts);
        model.update(Some(Message::CycleRowsPerPage)).unwrap();
        let ui = model.get_uidata();
        assert_eq!(ui.rows_per_page, 25);
        assert!(Arc::ptr_eq(&charts_before, &ui.charts));

        model.update(Some(Message::NextRepository)).unwrap();
        assert!(!Arc::ptr_eq(&charts_before, &model.get_uidata().charts));
    }

    #[test]
    fn typed_filter_with_completion() {
        let mut model = fixture_model(WFVConfig::default());
        model.update(Some(Message::Filter)).unwrap();
        assert!(model.raw_keyevents());
        key(&mut model, KeyCode::Char('s'));
        key(&mut model, KeyCode::Tab);
        assert_eq!(model.get_uidata().cmdinput.input, "svc");
        key(&mut model, KeyCode::Enter);
        assert!(!model.raw_keyevents());
        assert_eq!(model.get_uidata().filter.as_deref(), Some("svc"));

        model.update(Some(Message::Filter)).unwrap();
        for c in "nope".chars() {
            key(&mut model, KeyCode::Char(c));
        }
        key(&mut model, KeyCode::Enter);
        assert_eq!(model.get_uidata().filter.as_deref(), Some("svc"));
        assert_eq!(model.get_uidata().status_message, "Unknown repository nope");

        model.update(Some(Message::Filter)).unwrap();
        key(&mut model, KeyCode::Enter);
        assert_eq!(model.get_uidata().filter, None);
    }

    #[test]
    fn enter_shows_workflow_text() {
        let mut model = fixture_model(WFVConfig::default().with_repository("svc".to_string()));
        assert_eq!(model.get_uidata().filter.as_deref(), Some("svc"));
        model.update(Some(Message::Enter)).unwrap();
        let ui = model.get_uidata();
        assert!(ui.show_popup);
        assert_eq!(ui.popup_title, "acme/svc/wf1.json");
        assert!(ui.popup_message.starts_with("name: build"));

        // while the popup is open navigation is ignored
        model.update(Some(Message::NextRepository)).unwrap();
        assert_eq!(model.get_uidata().filter.as_deref(), Some("svc"));

        model.update(Some(Message::Exit)).unwrap();
        assert!(!model.get_uidata().show_popup);
    }

    #[test]
    fn enter_on_older_version_shows_its_workflow() {
        let mut model = fixture_model(WFVConfig::default().with_repository("svc".to_string()));
        model.update(Some(Message::MoveDown)).unwrap();
        model.update(Some(Message::Enter)).unwrap();
        let ui = model.get_uidata();
        assert_eq!(ui.popup_title, "acme/svc/release.json");
        assert_eq!(ui.popup_message, "name: release\n");
    }

    #[test]
    fn selection_stays_inside_page() {
        let mut model = fixture_model(WFVConfig::default().with_rows_per_page(2));
        model.update(Some(Message::MoveDown)).unwrap();
        model.update(Some(Message::MoveDown)).unwrap();
        assert_eq!(model.get_uidata().selected_row, Some(1));
        model.update(Some(Message::NextPage)).unwrap();
        assert_eq!(model.get_uidata().selected_row, Some(0));
        model.update(Some(Message::MoveUp)).unwrap();
        assert_eq!(model.get_uidata().selected_row, Some(0));
    }

    #[test]
    fn failed_index_shows_banner_and_placeholder() {
        let loader = Loader::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/nothing"));
        let report = loader.load_all_data();
        let mut model = Model::init(&WFVConfig::default(), report, Some(loader));
        let ui = model.get_uidata();
        assert!(ui.error_banner.is_some());
        assert_eq!(ui.table[0].data, vec![NO_DATA.to_string()]);
        assert_eq!(ui.selected_row, None);
        assert_eq!(ui.stats, Stats::default());

        model.update(Some(Message::Enter)).unwrap();
        assert!(!model.get_uidata().show_popup);
        model.update(Some(Message::Quit)).unwrap();
        assert_eq!(model.status, Status::QUITTING);
    }

    #[test]
    fn charts_toggle() {
        let mut model = fixture_model(WFVConfig::default());
        model.update(Some(Message::ToggleCharts)).unwrap();
        assert!(model.get_uidata().show_charts);
        model.update(Some(Message::Help)).unwrap();
        assert!(model.get_uidata().show_charts);
        assert!(model.get_uidata().show_popup);
        model.update(Some(Message::Exit)).unwrap();
        assert!(model.get_uidata().show_charts);
        model.update(Some(Message::Exit)).unwrap();
        assert!(!model.get_uidata().show_charts);
    }
}
