use std::ops::Range;
use std::sync::Arc;

use tracing::trace;

use crate::domain::ROWS_PER_PAGE_OPTIONS;
use crate::record::FindingRecord;

/// What has to be rebuilt after a state transition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rerender {
    pub table: bool,
    pub stats: bool,
    pub charts: bool,
}

impl Rerender {
    pub const NOTHING: Rerender = Rerender {
        table: false,
        stats: false,
        charts: false,
    };
    pub const TABLE: Rerender = Rerender {
        table: true,
        stats: false,
        charts: false,
    };
    pub const ALL: Rerender = Rerender {
        table: true,
        stats: true,
        charts: true,
    };

    pub fn any(&self) -> bool {
        self.table || self.stats || self.charts
    }
}

/// Number of pages needed for `len` rows.
pub fn page_count(len: usize, rows_per_page: usize) -> usize {
    if rows_per_page == 0 {
        return 0;
    }
    len.div_ceil(rows_per_page)
}

/// Pagination and filter state over an immutable record set.
pub struct Session {
    records: Arc<Vec<FindingRecord>>,
    rows: Arc<Vec<usize>>, // Mapping of filtered row index to record index
    repositories: Vec<String>,
    filter: Option<String>,
    current_page: usize,
    rows_per_page: usize,
}

impl Session {
    pub fn new(records: Arc<Vec<FindingRecord>>, rows_per_page: usize) -> Self {
        let mut repositories: Vec<String> =
            records.iter().map(|r| r.repository().to_string()).collect();
        repositories.sort_unstable();
        repositories.dedup();

        Session {
            rows: Arc::new((0..records.len()).collect()),
            records,
            repositories,
            filter: None,
            current_page: 1,
            rows_per_page: rows_per_page.max(1),
        }
    }

    pub fn filtered_len(&self) -> usize {
        self.rows.len()
    }

    pub fn filtered_records(&self) -> impl Iterator<Item = &FindingRecord> {
        self.rows.iter().map(|&idx| &self.records[idx])
    }

    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn rows_per_page(&self) -> usize {
        self.rows_per_page
    }

    pub fn page_count(&self) -> usize {
        page_count(self.rows.len(), self.rows_per_page)
    }

    fn last_page(&self) -> usize {
        self.page_count().max(1)
    }

    /// Range into the filtered rows shown on the current page.
    pub fn page_range(&self) -> Range<usize> {
        let start = std::cmp::min((self.current_page - 1) * self.rows_per_page, self.rows.len());
        let end = std::cmp::min(start + self.rows_per_page, self.rows.len());
        start..end
    }

    pub fn page_records(&self) -> Vec<&FindingRecord> {
        self.rows[self.page_range()]
            .iter()
            .map(|&idx| &self.records[idx])
            .collect()
    }

    pub fn set_filter(&mut self, repository: Option<&str>) -> Rerender {
        self.filter = repository.map(|r| r.to_string());
        let rows: Vec<usize> = match &self.filter {
            Some(repo) => self
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.repository() == repo)
                .map(|(idx, _)| idx)
                .collect(),
            None => (0..self.records.len()).collect(),
        };
        trace!("Filter {:?} matches {} rows", self.filter, rows.len());
        self.rows = Arc::new(rows);
        self.current_page = 1;
        Rerender::ALL
    }

    /// Step through the repository dropdown. No filter sits before the first entry.
    pub fn cycle_repository(&mut self, forward: bool) -> Rerender {
        if self.repositories.is_empty() {
            return Rerender::NOTHING;
        }
        let current = self
            .filter
            .as_ref()
            .and_then(|f| self.repositories.iter().position(|r| r == f));
        let last = self.repositories.len() - 1;
        let next = match (current, forward) {
            (None, true) => Some(0),
            (None, false) => Some(last),
            (Some(i), true) if i < last => Some(i + 1),
            (Some(i), false) if i > 0 => Some(i - 1),
            (Some(_), _) => None,
        };
        let repo = next.map(|i| self.repositories[i].clone());
        self.set_filter(repo.as_deref())
    }

    /// First repository starting with `prefix`.
    pub fn complete_repository(&self, prefix: &str) -> Option<&str> {
        self.repositories
            .iter()
            .find(|r| r.starts_with(prefix))
            .map(|r| r.as_str())
    }

    pub fn set_rows_per_page(&mut self, rows_per_page: usize) -> Rerender {
        if rows_per_page == 0 {
            return Rerender::NOTHING;
        }
        self.rows_per_page = rows_per_page;
        self.current_page = 1;
        Rerender::TABLE
    }

    pub fn cycle_rows_per_page(&mut self) -> Rerender {
        let next = ROWS_PER_PAGE_OPTIONS
            .iter()
            .copied()
            .find(|&n| n > self.rows_per_page)
            .unwrap_or(ROWS_PER_PAGE_OPTIONS[0]);
        self.set_rows_per_page(next)
    }

    pub fn prev_page(&mut self) -> Rerender {
        if self.current_page <= 1 {
            return Rerender::NOTHING;
        }
        self.current_page -= 1;
        Rerender::TABLE
    }

    pub fn next_page(&mut self) -> Rerender {
        if self.current_page >= self.last_page() {
            return Rerender::NOTHING;
        }
        self.current_page += 1;
        Rerender::TABLE
    }

    pub fn first_page(&mut self) -> Rerender {
        self.goto_page(1)
    }

    pub fn last_page_jump(&mut self) -> Rerender {
        self.goto_page(self.last_page())
    }

    fn goto_page(&mut self, page: usize) -> Rerender {
        let page = page.clamp(1, self.last_page());
        if page == self.current_page {
            return Rerender::NOTHING;
        }
        self.current_page = page;
        Rerender::TABLE
    }

    /// "Showing a to b of n entries" for the current page.
    pub fn pagination_info(&self) -> String {
        let range = self.page_range();
        if range.is_empty() {
            return format!("Showing 0 to 0 of {} entries", self.rows.len());
        }
        format!(
            "Showing {} to {} of {} entries",
            range.start + 1,
            range.end,
            self.rows.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordMetrics;
    use std::collections::BTreeMap;

    fn records(repos: &[(&str, usize)]) -> Arc<Vec<FindingRecord>> {
        let mut out = Vec::new();
        for (repo, n) in repos {
            for i in 0..*n {
                let file = format!("wf{i}.json");
                out.push(FindingRecord::new(
                    "acme",
                    repo,
                    &file,
                    &file,
                    None,
                    RecordMetrics::default(),
                    BTreeMap::new(),
                ));
            }
        }
        Arc::new(out)
    }

    #[test]
    fn pages_round_up() {
        assert_eq!(page_count(0, 10), 0);
        assert_eq!(page_count(10, 10), 1);
        assert_eq!(page_count(11, 10), 2);
        assert_eq!(page_count(25, 10), 3);
    }

    #[test]
    fn prev_on_first_page_is_noop() {
        let mut session = Session::new(records(&[("svc", 25)]), 10);
        assert_eq!(session.prev_page(), Rerender::NOTHING);
        assert_eq!(session.current_page(), 1);
    }

    #[test]
    fn next_on_last_page_is_noop() {
        let mut session = Session::new(records(&[("svc", 25)]), 10);
        assert_eq!(session.next_page(), Rerender::TABLE);
        assert_eq!(session.next_page(), Rerender::TABLE);
        assert_eq!(session.current_page(), 3);
        assert_eq!(session.next_page(), Rerender::NOTHING);
        assert_eq!(session.current_page(), 3);
        assert_eq!(session.page_range(), 20..25);
        assert_eq!(session.page_records().len(), 5);
        assert_eq!(session.pagination_info(), "Showing 21 to 25 of 25 entries");
    }

    #[test]
    fn empty_session_stays_on_page_one() {
        let mut session = Session::new(records(&[]), 10);
        assert_eq!(session.page_count(), 0);
        assert_eq!(session.next_page(), Rerender::NOTHING);
        assert_eq!(session.prev_page(), Rerender::NOTHING);
        assert_eq!(session.last_page_jump(), Rerender::NOTHING);
        assert!(session.page_records().is_empty());
        assert_eq!(session.pagination_info(), "Showing 0 to 0 of 0 entries");
    }

    #[test]
    fn filter_by_repository_resets_page() {
        let mut session = Session::new(records(&[("svc", 15), ("other", 7)]), 10);
        session.next_page();
        assert_eq!(session.current_page(), 2);

        assert_eq!(session.set_filter(Some("svc")), Rerender::ALL);
        assert_eq!(session.current_page(), 1);
        assert_eq!(session.filtered_len(), 15);
        assert!(session.filtered_records().all(|r| r.repository() == "svc"));

        session.set_filter(None);
        assert_eq!(session.filtered_len(), 22);

        session.set_filter(Some("nope"));
        assert_eq!(session.filtered_len(), 0);
        assert!(session.page_records().is_empty());
    }

    #[test]
    fn rows_per_page_resets_page_and_only_touches_table() {
        let mut session = Session::new(records(&[("svc", 60)]), 10);
        session.next_page();
        assert_eq!(session.cycle_rows_per_page(), Rerender::TABLE);
        assert_eq!(session.rows_per_page(), 25);
        assert_eq!(session.current_page(), 1);
        session.cycle_rows_per_page();
        session.cycle_rows_per_page();
        assert_eq!(session.rows_per_page(), 100);
        session.cycle_rows_per_page();
        assert_eq!(session.rows_per_page(), 10);
        assert_eq!(session.set_rows_per_page(0), Rerender::NOTHING);
        assert_eq!(session.rows_per_page(), 10);
    }

    #[test]
    fn repository_dropdown_cycles_through_none() {
        let mut session = Session::new(records(&[("svc", 1), ("other", 1)]), 10);
        assert_eq!(session.repositories(), ["other", "svc"]);
        session.cycle_repository(true);
        assert_eq!(session.filter(), Some("other"));
        session.cycle_repository(true);
        assert_eq!(session.filter(), Some("svc"));
        session.cycle_repository(true);
        assert_eq!(session.filter(), None);
        session.cycle_repository(false);
        assert_eq!(session.filter(), Some("svc"));
        assert_eq!(session.complete_repository("ot"), Some("other"));
        assert_eq!(session.complete_repository("x"), None);
    }
}
