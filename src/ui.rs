use crate::color::{ColorScale, LegendBucket, Rgb};
use crate::export::{display_rows, DisplayRow};
use crate::pipeline::ConsolidatedDataset;
use crate::records::GroupLevel;
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

const PAGE_JUMP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Regions,
    Groups,
}

impl Page {
    pub fn toggle(&self) -> Self {
        match self {
            Page::Regions => Page::Groups,
            Page::Groups => Page::Regions,
        }
    }

    pub fn level(&self) -> GroupLevel {
        match self {
            Page::Regions => GroupLevel::Region,
            Page::Groups => GroupLevel::Group,
        }
    }
}

/// One grouping level as shown on screen
pub struct LevelView {
    pub level: GroupLevel,
    pub years: Vec<i32>,
    pub rows: Vec<DisplayRow>,
    pub scale: ColorScale,
    pub legend: Vec<LegendBucket>,
    pub state: TableState,
}

impl LevelView {
    pub fn new(dataset: &ConsolidatedDataset) -> Self {
        let scale = dataset.mean_rate_scale();
        let rows = display_rows(dataset);
        let mut state = TableState::default();
        if !rows.is_empty() {
            state.select(Some(0));
        }

        LevelView {
            level: dataset.level,
            years: dataset.window.years().collect(),
            legend: scale.legend(),
            rows,
            scale,
            state,
        }
    }

    pub fn next(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i >= len - 1 => 0,
            Some(i) => i + 1,
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = self
            .state
            .selected()
            .map(|i| (i + PAGE_JUMP).min(len - 1))
            .unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let i = self
            .state
            .selected()
            .map(|i| i.saturating_sub(PAGE_JUMP))
            .unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn selected_row(&self) -> Option<&DisplayRow> {
        self.state.selected().and_then(|i| self.rows.get(i))
    }
}

pub struct App {
    pub regions: LevelView,
    pub groups: LevelView,
    pub current_page: Page,
}

impl App {
    pub fn new(regions: &ConsolidatedDataset, groups: &ConsolidatedDataset) -> Self {
        App {
            regions: LevelView::new(regions),
            groups: LevelView::new(groups),
            current_page: Page::Groups,
        }
    }

    pub fn current(&self) -> &LevelView {
        match self.current_page {
            Page::Regions => &self.regions,
            Page::Groups => &self.groups,
        }
    }

    pub fn current_mut(&mut self) -> &mut LevelView {
        match self.current_page {
            Page::Regions => &mut self.regions,
            Page::Groups => &mut self.groups,
        }
    }

    pub fn toggle_page(&mut self) {
        self.current_page = self.current_page.toggle();
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                KeyCode::Tab | KeyCode::BackTab => app.toggle_page(),
                KeyCode::Down | KeyCode::Char('j') => app.current_mut().next(),
                KeyCode::Up | KeyCode::Char('k') => app.current_mut().previous(),
                KeyCode::PageDown => app.current_mut().page_down(),
                KeyCode::PageUp => app.current_mut().page_up(),
                KeyCode::Home => app.current_mut().state.select(Some(0)),
                KeyCode::End => {
                    let view = app.current_mut();
                    if !view.rows.is_empty() {
                        let last = view.rows.len() - 1;
                        view.state.select(Some(last));
                    }
                }
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with page tabs
            Constraint::Min(0),    // Table + legend
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    let content = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(28)])
        .split(chunks[1]);

    render_table(f, content[0], app.current_mut());
    render_legend(f, content[1], app.current());
    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Groups, Page::Regions].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.level().title(), style));
    }

    let view = app.current();
    let total: u64 = view.rows.iter().flat_map(|r| r.deaths.iter()).sum();
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Rows: {}", view.rows.len()),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Deaths: {}", total),
        Style::default().fg(Color::Red),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn to_color(rgb: Rgb) -> Color {
    Color::Rgb(rgb.r, rgb.g, rgb.b)
}

/// Dark text on light fills, light text on dark ones
fn text_on(rgb: Rgb) -> Color {
    if rgb.luma() > 140.0 {
        Color::Black
    } else {
        Color::White
    }
}

fn delta_color(delta: f64) -> Color {
    if delta > 0.0 {
        Color::Red
    } else if delta < 0.0 {
        Color::Green
    } else {
        Color::White
    }
}

fn column_titles(view: &LevelView) -> Vec<String> {
    let mut titles: Vec<String> = vec!["Code".to_string(), "Name".to_string()];
    if view.level == GroupLevel::Region {
        titles.push("Group".to_string());
    }
    titles.extend(view.years.iter().map(|y| format!("Deaths {y}")));
    titles.push("Mean rate".to_string());
    titles.push("Δ rate %".to_string());
    titles.push("Δ deaths %".to_string());
    titles
}

/// Display table for one level: code, name, group, deaths per year, mean rate
/// and the rate and deaths deltas
pub fn render_table(f: &mut Frame, area: Rect, view: &mut LevelView) {
    let header = Row::new(column_titles(view).into_iter().map(|h| {
        Cell::from(h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    }))
    .style(Style::default().bg(Color::DarkGray))
    .height(1);

    let rows = view.rows.iter().map(|row| {
        let fill = view.scale.rgb_for(row.mean_rate);

        let mut cells = vec![Cell::from(row.code.clone()), Cell::from(truncate(&row.name, 28))];
        if view.level == GroupLevel::Region {
            cells.push(Cell::from(truncate(&row.group, 24)));
        }
        cells.extend(row.deaths.iter().map(|d| Cell::from(d.to_string())));
        cells.push(
            Cell::from(format!("{:.2}", row.mean_rate))
                .style(Style::default().bg(to_color(fill)).fg(text_on(fill))),
        );
        cells.push(
            Cell::from(format!("{:+.1}", row.delta_pct))
                .style(Style::default().fg(delta_color(row.delta_pct))),
        );
        cells.push(
            Cell::from(format!("{:+.1}", row.deaths_delta_pct))
                .style(Style::default().fg(delta_color(row.deaths_delta_pct))),
        );

        Row::new(cells).height(1)
    });

    let mut widths = vec![Constraint::Length(12), Constraint::Length(30)];
    if view.level == GroupLevel::Region {
        widths.push(Constraint::Length(26));
    }
    widths.extend(view.years.iter().map(|_| Constraint::Length(12)));
    widths.push(Constraint::Length(11));
    widths.push(Constraint::Length(10));
    widths.push(Constraint::Length(12));

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(format!(" {} ", view.level.title())),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut view.state);
}

fn render_legend(f: &mut Frame, area: Rect, view: &LevelView) {
    let mut lines = vec![Line::from(Span::styled(
        "Mean rate /100k",
        Style::default().add_modifier(Modifier::BOLD),
    ))];

    for bucket in &view.legend {
        let rgb = Rgb::from_hex(&bucket.color);
        lines.push(Line::from(vec![
            Span::styled("███ ", Style::default().fg(to_color(rgb))),
            Span::raw(bucket.label.clone()),
        ]));
    }

    if let Some(row) = view.selected_row() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            truncate(&row.name, 24),
            Style::default().fg(Color::Yellow),
        )));
        for (year, deaths) in view.years.iter().zip(&row.deaths) {
            lines.push(Line::from(format!("{year}: {deaths} deaths")));
        }
    }

    let legend = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Legend "),
    );

    f.render_widget(legend, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let view = app.current();
    let selected = view.state.selected().map(|i| i + 1).unwrap_or(0);

    let status_spans = vec![
        Span::styled(
            format!(" Row: {}/{} ", selected, view.rows.len()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        Span::styled("Tab", Style::default().fg(Color::Yellow)),
        Span::raw(" Level | "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(" Nav | "),
        Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)),
        Span::raw(" Fast | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::YearWindow;
    use crate::pipeline::ConsolidatedRow;

    fn dataset(level: GroupLevel, n: usize) -> ConsolidatedDataset {
        let rows = (0..n)
            .map(|i| ConsolidatedRow {
                group_key: format!("{i}"),
                display_name: format!("Região {i}"),
                parent_group: None,
                deaths: [(2022, i as u64)].into_iter().collect(),
                population: Default::default(),
                rates: Default::default(),
                mean_rate: i as f64,
                delta_pct: 0.0,
                deaths_delta_pct: 0.0,
                geometry: None,
                resolution: None,
            })
            .collect();
        ConsolidatedDataset {
            level,
            window: YearWindow::new(2022, 1).unwrap(),
            rows,
        }
    }

    #[test]
    fn test_navigation_wraps() {
        let mut view = LevelView::new(&dataset(GroupLevel::Region, 3));
        assert_eq!(view.state.selected(), Some(0));
        // Highest mean rate first
        assert_eq!(view.selected_row().unwrap().code, "2");

        view.previous();
        assert_eq!(view.state.selected(), Some(2));
        view.next();
        assert_eq!(view.state.selected(), Some(0));
        view.page_down();
        assert_eq!(view.state.selected(), Some(2));
        view.page_up();
        assert_eq!(view.state.selected(), Some(0));
    }

    #[test]
    fn test_empty_view_has_no_selection() {
        let mut view = LevelView::new(&dataset(GroupLevel::Group, 0));
        view.next();
        view.page_down();
        assert!(view.selected_row().is_none());
        assert_eq!(view.legend.len(), 5);
    }

    #[test]
    fn test_page_toggle() {
        let mut app = App::new(&dataset(GroupLevel::Region, 2), &dataset(GroupLevel::Group, 1));
        assert_eq!(app.current().level, GroupLevel::Group);
        app.toggle_page();
        assert_eq!(app.current().rows.len(), 2);
    }

    #[test]
    fn test_columns_show_both_deltas() {
        let regions = LevelView::new(&dataset(GroupLevel::Region, 1));
        let titles = column_titles(&regions);
        assert_eq!(titles.len(), 7);
        assert_eq!(titles[2], "Group");
        assert_eq!(&titles[5..], &["Δ rate %".to_string(), "Δ deaths %".to_string()]);

        let groups = LevelView::new(&dataset(GroupLevel::Group, 1));
        assert_eq!(column_titles(&groups).len(), 6);
    }

    #[test]
    fn test_truncate_keeps_char_boundaries() {
        assert_eq!(truncate("São Paulo", 20), "São Paulo");
        assert_eq!(truncate("São Bernardo do Campo", 8), "São B...");
    }
}
