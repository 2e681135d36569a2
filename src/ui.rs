use ratatui::{
    Frame,
    layout::{Constraint, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Bar, BarChart, BarGroup, Block, Borders, Cell, Chart, Clear, Dataset, GraphType,
        Paragraph, Row, Table, TableState, Wrap,
    },
};

use crate::charts::{self, ScatterSeries, TimelineSeries};
use crate::domain::CMDMode;
use crate::model::UIData;
use crate::stats::interpret_correlation;

const HEADER_STYLE: Style = Style::new().fg(Color::Yellow).add_modifier(Modifier::BOLD);
const SELECTED_STYLE: Style = Style::new().bg(Color::DarkGray).add_modifier(Modifier::BOLD);
const BANNER_STYLE: Style = Style::new().fg(Color::White).bg(Color::Red);
const BAR_WIDTH: u16 = 7;
const POPUP_WIDTH_PERCENT: u16 = 80;
const POPUP_HEIGHT_PERCENT: u16 = 80;

#[derive(Default)]
pub struct TableUI {}

impl TableUI {
    pub fn new() -> Self {
        Self {}
    }

    pub fn draw(&self, uidata: &UIData, frame: &mut Frame) {
        let banner_height = if uidata.error_banner.is_some() { 1 } else { 0 };
        let [banner, header, body, footer, cmdline] = Layout::vertical([
            Constraint::Length(banner_height),
            Constraint::Length(4),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(frame.area());

        if let Some(error) = &uidata.error_banner {
            frame.render_widget(Paragraph::new(error.as_str()).style(BANNER_STYLE), banner);
        }
        self.draw_stats(uidata, frame, header);
        if uidata.show_charts {
            self.draw_charts(uidata, frame, body);
        } else {
            self.draw_table(uidata, frame, body);
        }
        self.draw_footer(uidata, frame, footer);
        self.draw_cmdline(uidata, frame, cmdline);

        if uidata.show_popup {
            self.draw_popup(uidata, frame);
        }
    }

    fn draw_stats(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let stats = &uidata.stats;
        let c = &uidata.correlations;
        let correlation = |label: &'static str, r: f64| {
            vec![
                Span::raw(format!("{label} ")),
                Span::raw(format!("{r:.3}")).bold(),
                Span::raw(format!(" ({})  ", interpret_correlation(r))),
            ]
        };

        let lines = vec![
            Line::from(vec![
                "Findings: ".into(),
                Span::raw(stats.total_findings.to_string()).bold(),
                "  Workflows: ".into(),
                Span::raw(stats.total_count.to_string()).bold(),
                "  Avg lines: ".into(),
                Span::raw(format!("{:.1}", stats.avg_line_count)).bold(),
                "  Findings/line: ".into(),
                Span::raw(format!("{:.4}", stats.findings_per_line)).bold(),
            ]),
            Line::from(
                [
                    correlation("lines~findings", c.lines_findings),
                    correlation("jobs~findings", c.jobs_findings),
                    correlation("steps~findings", c.steps_findings),
                ]
                .concat(),
            ),
        ];
        let title = format!(" wfv: {} ", uidata.name);
        let block = Block::default().title(Span::raw(title).bold()).borders(Borders::ALL);
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_table(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let header = Row::new(
            uidata
                .table
                .iter()
                .map(|c| Cell::from(c.name.as_str()))
                .collect::<Vec<Cell>>(),
        )
        .style(HEADER_STYLE);

        let nrows = uidata.table.first().map(|c| c.data.len()).unwrap_or(0);
        let rows: Vec<Row> = (0..nrows)
            .map(|idx| {
                Row::new(
                    uidata
                        .table
                        .iter()
                        .map(|c| Cell::from(c.data[idx].as_str()))
                        .collect::<Vec<Cell>>(),
                )
            })
            .collect();
        let widths: Vec<Constraint> = uidata
            .table
            .iter()
            .map(|c| Constraint::Length(c.width as u16))
            .collect();

        let table = Table::new(rows, widths)
            .header(header)
            .column_spacing(2)
            .row_highlight_style(SELECTED_STYLE)
            .block(Block::default().borders(Borders::ALL));
        let mut state = TableState::default().with_selected(uidata.selected_row);
        frame.render_stateful_widget(table, area, &mut state);
    }

    fn draw_charts(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let charts = &uidata.charts;
        if charts.is_empty() {
            let block = Block::default().title(" Charts ").borders(Borders::ALL);
            frame.render_widget(Paragraph::new(crate::table::NO_DATA).block(block), area);
            return;
        }

        let [top, bottom] =
            Layout::vertical([Constraint::Percentage(50), Constraint::Percentage(50)]).areas(area);
        let [histogram, magnitude, severity] = Layout::horizontal([
            Constraint::Percentage(40),
            Constraint::Percentage(40),
            Constraint::Percentage(20),
        ])
        .areas(top);
        let [scatter, timeline] =
            Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)])
                .areas(bottom);

        frame.render_widget(
            bar_chart(" Findings per workflow ", &charts.findings_histogram, Color::Cyan),
            histogram,
        );
        frame.render_widget(
            bar_chart(" Findings per line ", &charts.magnitude_buckets, Color::Magenta),
            magnitude,
        );
        frame.render_widget(
            bar_chart(" Severity ", &charts.severities, Color::Red),
            severity,
        );
        self.draw_scatter(&charts.lines_vs_findings, frame, scatter);
        self.draw_timeline(&charts.timeline, frame, timeline);
    }

    fn draw_scatter(&self, series: &ScatterSeries, frame: &mut Frame, area: Rect) {
        let regression: Vec<(f64, f64)> = series
            .regression
            .map(|line| line.to_vec())
            .unwrap_or_default();

        let mut datasets = vec![
            Dataset::default()
                .name("workflows")
                .marker(symbols::Marker::Dot)
                .graph_type(GraphType::Scatter)
                .style(Style::default().fg(Color::Cyan))
                .data(&series.points),
        ];
        if !regression.is_empty() {
            datasets.push(
                Dataset::default()
                    .name("trend")
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(Color::Yellow))
                    .data(&regression),
            );
        }

        let chart = Chart::new(datasets)
            .block(
                Block::default()
                    .title(" Lines vs findings ")
                    .borders(Borders::ALL),
            )
            .x_axis(axis("line_count", series.x_bounds))
            .y_axis(axis("findings", series.y_bounds));
        frame.render_widget(chart, area);
    }

    fn draw_timeline(&self, series: &TimelineSeries, frame: &mut Frame, area: Rect) {
        let x_max = (series.points.len().max(2) - 1) as f64;
        let labels: Vec<Span> = match (series.labels.first(), series.labels.last()) {
            (Some(first), Some(last)) => vec![Span::raw(first.clone()), Span::raw(last.clone())],
            _ => vec![Span::raw("-")],
        };

        let datasets = vec![
            Dataset::default()
                .name("findings")
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Green))
                .data(&series.points),
        ];
        let chart = Chart::new(datasets)
            .block(Block::default().title(" Findings over time ").borders(Borders::ALL))
            .x_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .bounds([0.0, x_max])
                    .labels(labels),
            )
            .y_axis(axis("findings", [0.0, series.y_max]));
        frame.render_widget(chart, area);
    }

    fn draw_footer(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let filter = uidata.filter.as_deref().unwrap_or("all");
        let line = Line::from(vec![
            uidata.pagination.as_str().into(),
            format!("  page {}/{}", uidata.page, uidata.pages.max(1)).into(),
            format!("  rows {}", uidata.rows_per_page).into(),
            "  repository: ".into(),
            Span::raw(filter).bold(),
            "  ? help".dark_gray(),
        ]);
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_cmdline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if !uidata.active_cmdinput {
            frame.render_widget(
                Paragraph::new(uidata.status_message.as_str()).dark_gray(),
                area,
            );
            return;
        }

        let prompt = match uidata.cmd_mode {
            Some(CMDMode::FilterByRepository) => "repository: ",
            None => ": ",
        };
        let line = Line::from(vec![prompt.bold(), uidata.cmdinput.input.as_str().into()]);
        frame.render_widget(Paragraph::new(line), area);
        frame.set_cursor_position(Position::new(
            area.x + (prompt.len() + uidata.cmdinput.curser_pos) as u16,
            area.y,
        ));
    }

    fn draw_popup(&self, uidata: &UIData, frame: &mut Frame) {
        let area = centered_rect(POPUP_WIDTH_PERCENT, POPUP_HEIGHT_PERCENT, frame.area());
        frame.render_widget(Clear, area);
        let block = Block::default()
            .title(Span::raw(format!(" {} ", uidata.popup_title)).bold())
            .title_bottom(Line::from(" Esc to close ").centered())
            .borders(Borders::ALL);
        let popup = Paragraph::new(uidata.popup_message.as_str())
            .wrap(Wrap { trim: false })
            .block(block);
        frame.render_widget(popup, area);
    }
}

fn bar_chart<'a>(title: &'a str, bars: &'a [charts::Bar], color: Color) -> BarChart<'a> {
    let bars: Vec<Bar> = bars
        .iter()
        .map(|b| {
            Bar::default()
                .value(b.value)
                .label(Line::from(b.label.as_str()))
        })
        .collect();
    BarChart::default()
        .block(Block::default().title(title).borders(Borders::ALL))
        .bar_width(BAR_WIDTH)
        .bar_gap(1)
        .bar_style(Style::default().fg(color))
        .data(BarGroup::default().bars(&bars))
}

fn axis(title: &str, bounds: [f64; 2]) -> Axis<'static> {
    Axis::default()
        .title(title.to_string())
        .style(Style::default().fg(Color::Gray))
        .bounds(bounds)
        .labels(vec![
            Span::raw(format!("{:.0}", bounds[0])),
            Span::raw(format!("{:.0}", (bounds[0] + bounds[1]) / 2.0)),
            Span::raw(format!("{:.0}", bounds[1])),
        ])
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let [_, middle, _] = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .areas(area);

    let [_, center, _] = Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .areas(middle);
    center
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WFVConfig;
    use crate::loader::Loader;
    use crate::model::Model;
    use ratatui::{Terminal, backend::TestBackend};
    use std::path::Path;

    fn render(model: &Model) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        let ui = TableUI::new();
        terminal
            .draw(|f| ui.draw(model.get_uidata(), f))
            .unwrap();
        let buffer = terminal.backend().buffer();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|line| line.iter().map(|c| c.symbol()).collect::<String>())
            .collect::<Vec<String>>()
            .join("\n")
    }

    fn model(dir: &str) -> Model {
        let loader = Loader::new(Path::new(env!("CARGO_MANIFEST_DIR")).join(dir));
        let report = loader.load_all_data();
        Model::init(&WFVConfig::default(), report, Some(loader))
    }

    #[test]
    fn table_view_shows_stats_and_pagination() {
        let screen = render(&model("tests/fixtures/data"));
        assert!(screen.contains("Findings: 6"));
        assert!(screen.contains("repository"));
        assert!(screen.contains("release @ 2024-06-12T08:30:00"));
        assert!(screen.contains("Showing 1 to 4 of 4 entries"));
    }

    #[test]
    fn failed_load_shows_banner() {
        let screen = render(&model("tests/fixtures/nothing"));
        assert!(screen.contains("Failed to load workflow_index.json"));
        assert!(screen.contains(crate::table::NO_DATA));
    }

    #[test]
    fn centered_rect_is_inside() {
        let area = Rect::new(0, 0, 100, 50);
        let popup = centered_rect(80, 80, area);
        assert_eq!(popup.width, 80);
        assert_eq!(popup.height, 40);
        assert_eq!(popup.x, 10);
    }
}
