use crate::record::FindingRecord;

pub const NO_DATA: &str = "No data available";
pub const HEADERS: [&str; 7] = [
    "repository",
    "workflow",
    "line_count",
    "jobs",
    "steps_per_job",
    "findings",
    "findings_per_line",
];

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
}

/// Display cells of one record, in [`HEADERS`] order.
pub fn record_cells(record: &FindingRecord) -> [String; 7] {
    let workflow = match record.version() {
        Some(version) => format!("{} @ {}", record.workflow(), version),
        None => record.workflow().to_string(),
    };
    [
        record.repository().to_string(),
        workflow,
        record.line_count().to_string(),
        record.jobs().to_string(),
        format!("{:.1}", record.steps_per_job()),
        record.findings().to_string(),
        format!("{:.4}", record.findings_per_line()),
    ]
}

/// Column views for one page of records. An empty page gets a single placeholder row.
pub fn page_columns(records: &[&FindingRecord]) -> Vec<ColumnView> {
    let mut columns: Vec<ColumnView> = HEADERS
        .iter()
        .map(|h| ColumnView {
            name: h.to_string(),
            width: h.len(),
            data: Vec::with_capacity(records.len()),
        })
        .collect();

    if records.is_empty() {
        columns[0].data.push(NO_DATA.to_string());
        columns[0].width = columns[0].width.max(NO_DATA.len());
        for column in columns[1..].iter_mut() {
            column.data.push(String::new());
        }
        return columns;
    }

    for record in records {
        for (column, cell) in columns.iter_mut().zip(record_cells(record)) {
            column.width = column.width.max(cell.chars().count());
            column.data.push(cell);
        }
    }
    columns
}

fn wrap_cell_content(c: &str) -> String {
    let needs_escaping = c.chars().any(|c| c == '"');
    let needs_wrapping = c.chars().any(|c| c == ' ' || c == '\t' || c == ',');
    let mut out = String::from(c);

    if needs_escaping {
        out = out.replace('"', "\"\"");
    }
    if needs_wrapping || needs_escaping {
        out = format!("\"{out}\"");
    }
    out
}

/// One record as a csv line, used for the clipboard.
pub fn record_as_csv(record: &FindingRecord) -> String {
    record_cells(record)
        .iter()
        .map(|c| wrap_cell_content(c))
        .collect::<Vec<String>>()
        .join(",")
}
