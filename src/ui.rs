use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fee_portal::dashboard::{DashboardData, FeeForecast, Learner, PaymentStatus};
use fee_portal::pricing::{format_rand, PlanOffer};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Learners,
    Plans,
    Forecast,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Learners => Page::Plans,
            Page::Plans => Page::Forecast,
            Page::Forecast => Page::Learners,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Learners => Page::Forecast,
            Page::Plans => Page::Learners,
            Page::Forecast => Page::Plans,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Learners => "Learners",
            Page::Plans => "Financing Plans",
            Page::Forecast => "Forecast",
        }
    }
}

pub struct App {
    pub dashboard: DashboardData,
    pub plans: Vec<PlanOffer>,
    pub forecast: FeeForecast,
    pub current_page: Page,
    pub learner_state: TableState,
    pub plan_state: TableState,
    pub show_detail: bool,
}

impl App {
    pub fn new(dashboard: DashboardData, plans: Vec<PlanOffer>, forecast: FeeForecast) -> Self {
        let mut learner_state = TableState::default();
        if !dashboard.learners.is_empty() {
            learner_state.select(Some(0));
        }

        let mut plan_state = TableState::default();
        let recommended = plans.iter().position(|p| p.recommended).unwrap_or(0);
        if !plans.is_empty() {
            plan_state.select(Some(recommended));
        }

        Self {
            dashboard,
            plans,
            forecast,
            current_page: Page::Learners,
            learner_state,
            plan_state,
            show_detail: false,
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn selected_learner(&self) -> Option<&Learner> {
        self.learner_state
            .selected()
            .and_then(|i| self.dashboard.learners.get(i))
    }

    pub fn selected_plan(&self) -> Option<&PlanOffer> {
        self.plan_state.selected().and_then(|i| self.plans.get(i))
    }

    fn active_list(&mut self) -> Option<(&mut TableState, usize)> {
        match self.current_page {
            Page::Learners => Some((&mut self.learner_state, self.dashboard.learners.len())),
            Page::Plans => Some((&mut self.plan_state, self.plans.len())),
            Page::Forecast => None,
        }
    }

    /// Move the selection on the current page, wrapping at both ends
    pub fn step(&mut self, forward: bool) {
        let Some((state, len)) = self.active_list() else {
            return;
        };
        if len == 0 {
            return;
        }
        let i = match state.selected() {
            Some(i) if forward => (i + 1) % len,
            Some(0) => len - 1,
            Some(i) => i - 1,
            None => 0,
        };
        state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
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

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('1') => app.current_page = Page::Learners,
                KeyCode::Char('2') => app.current_page = Page::Plans,
                KeyCode::Char('3') => app.current_page = Page::Forecast,
                KeyCode::Down | KeyCode::Char('j') => app.step(true),
                KeyCode::Up | KeyCode::Char('k') => app.step(false),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    let content = if app.show_detail && app.current_page != Page::Forecast {
        let split = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);
        render_detail_panel(f, split[1], app);
        split[0]
    } else {
        chunks[1]
    };

    match app.current_page {
        Page::Learners => render_learners(f, content, app),
        Page::Plans => render_plans(f, content, app),
        Page::Forecast => render_forecast(f, content, app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Learners, Page::Plans, Page::Forecast].iter().enumerate() {
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

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    let d = &app.dashboard;
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Learners: {}", d.total_learners),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Monthly R{}", format_rand(d.total_monthly_fees)),
        Style::default().fg(Color::Green),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Outstanding R{}", format_rand(d.outstanding_amount)),
        Style::default().fg(Color::Red),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn status_color(status: PaymentStatus) -> Color {
    match status {
        PaymentStatus::UpToDate => Color::Green,
        PaymentStatus::Partial => Color::Yellow,
        PaymentStatus::Overdue => Color::Red,
    }
}

fn render_learners(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.dashboard.learners.iter().map(|l| {
        Row::new(vec![
            Cell::from(format!("{} {}", l.first_name, l.surname)),
            Cell::from(l.grade.clone()),
            Cell::from(format!("R{}", format_rand(l.monthly_fee))),
            Cell::from(format!("R{}", format_rand(l.paid_this_month))),
            Cell::from(format!("R{}", format_rand(l.outstanding_amount))),
            Cell::from(l.next_payment_date.clone()),
            Cell::from(l.payment_status.to_string()).style(Style::default().fg(status_color(l.payment_status))),
        ])
    });

    let title = if app.dashboard.is_fallback {
        " Learners (no data on record) "
    } else {
        " Learners "
    };

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(22),
            Constraint::Percentage(10),
            Constraint::Percentage(13),
            Constraint::Percentage(13),
            Constraint::Percentage(13),
            Constraint::Percentage(14),
            Constraint::Percentage(15),
        ],
    )
    .header(header_row(&["Learner", "Grade", "Monthly", "Paid", "Outstanding", "Next Due", "Status"]))
    .block(Block::default().borders(Borders::ALL).title(title))
    .highlight_style(Style::default().bg(Color::Blue).add_modifier(Modifier::BOLD))
    .highlight_symbol("▶ ");

    f.render_stateful_widget(table, area, &mut app.learner_state);
}

fn render_plans(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.plans.iter().map(|p| {
        let title = if p.recommended {
            format!("{} ★", p.title)
        } else {
            p.title.clone()
        };
        Row::new(vec![
            Cell::from(title),
            Cell::from(format!("R{}", format_rand(p.price))),
            Cell::from(p.period.clone()),
            Cell::from(p.badge.as_ref().map(|b| b.text.clone()).unwrap_or_default()),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(35),
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(25),
        ],
    )
    .header(header_row(&["Plan", "Price", "Period", "Badge"]))
    .block(Block::default().borders(Borders::ALL).title(" Financing Plans "))
    .highlight_style(Style::default().bg(Color::Blue).add_modifier(Modifier::BOLD))
    .highlight_symbol("▶ ");

    f.render_stateful_widget(table, area, &mut app.plan_state);
}

fn render_forecast(f: &mut Frame, area: Rect, app: &App) {
    let rows = app.forecast.months.iter().map(|m| {
        Row::new(vec![
            Cell::from(m.month.clone()),
            Cell::from(format!("R{}", format_rand(m.standard_fees))),
            Cell::from(format!("R{}", format_rand(m.activity_fees))),
            Cell::from(format!("R{}", format_rand(m.total))).style(Style::default().add_modifier(Modifier::BOLD)),
        ])
    });

    let title = format!(
        " Forecast - remaining R{}{} ",
        format_rand(app.forecast.total_remaining),
        if app.forecast.is_fallback { " (sample data)" } else { "" }
    );

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(30),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(20),
        ],
    )
    .header(header_row(&["Month", "Standard Fees", "Activity Fees", "Total"]))
    .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let label = |s: &str| Span::styled(s.to_string(), Style::default().fg(Color::Cyan));

    let lines: Vec<Line> = match app.current_page {
        Page::Learners => match app.selected_learner() {
            Some(l) => vec![
                Line::from(vec![label("Learner: "), Span::raw(format!("{} {}", l.first_name, l.surname))]),
                Line::from(vec![label("ID: "), Span::raw(l.student_id.clone())]),
                Line::from(vec![label("Grade: "), Span::raw(l.grade.clone())]),
                Line::from(""),
                Line::from(vec![label("Monthly fee: "), Span::raw(format!("R{}", format_rand(l.monthly_fee)))]),
                Line::from(vec![label("Paid this month: "), Span::raw(format!("R{}", format_rand(l.paid_this_month)))]),
                Line::from(vec![label("Outstanding: "), Span::raw(format!("R{}", format_rand(l.outstanding_amount)))]),
                Line::from(vec![label("Next payment: "), Span::raw(l.next_payment_date.clone())]),
                Line::from(vec![
                    label("Debit order: "),
                    Span::raw(if l.facility_linked { "linked" } else { "not linked" }),
                ]),
            ],
            None => vec![Line::from("No learner selected")],
        },
        Page::Plans => match app.selected_plan() {
            Some(p) => {
                let mut lines = vec![
                    Line::from(vec![label("Plan: "), Span::raw(p.title.clone())]),
                    Line::from(Span::styled(p.subtitle.clone(), Style::default().fg(Color::DarkGray))),
                    Line::from(vec![label("Price: "), Span::raw(format!("R{} {}", format_rand(p.price), p.period))]),
                    Line::from(vec![label("Installments/year: "), Span::raw(p.installments_per_year.to_string())]),
                    Line::from(""),
                ];
                lines.extend(p.features.iter().map(|feat| Line::from(format!("• {}", feat.text))));
                lines
            }
            None => vec![Line::from("No plan selected")],
        },
        Page::Forecast => vec![],
    };

    let panel = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Detail "));
    f.render_widget(panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let text = Line::from(vec![
        Span::styled(" q ", Style::default().fg(Color::Black).bg(Color::Yellow)),
        Span::raw(" quit  "),
        Span::styled(" Tab ", Style::default().fg(Color::Black).bg(Color::Yellow)),
        Span::raw(" page  "),
        Span::styled(" j/k ", Style::default().fg(Color::Black).bg(Color::Yellow)),
        Span::raw(" move  "),
        Span::styled(" Enter ", Style::default().fg(Color::Black).bg(Color::Yellow)),
        Span::raw(" detail  "),
        Span::raw(format!("  {}", app.dashboard.current_month)),
    ]);

    let bar = Paragraph::new(text).block(Block::default().borders(Borders::ALL));
    f.render_widget(bar, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fee_portal::pricing::financing_plans;

    fn app() -> App {
        let today = NaiveDate::from_ymd_opt(2025, 11, 10).unwrap();
        let forecast = FeeForecast::fallback(today);
        let mut dashboard = DashboardData::empty(today);
        dashboard.learners = forecast.learners.clone();
        App::new(dashboard, financing_plans(72000.0, 1), forecast)
    }

    #[test]
    fn test_page_cycle() {
        let mut app = app();
        app.next_page();
        assert_eq!(app.current_page, Page::Plans);
        app.previous_page();
        app.previous_page();
        assert_eq!(app.current_page, Page::Forecast);
    }

    #[test]
    fn test_selection_wraps() {
        let mut app = app();
        assert_eq!(app.learner_state.selected(), Some(0));
        app.step(false);
        assert_eq!(app.learner_state.selected(), Some(1));
        app.step(true);
        assert_eq!(app.learner_state.selected(), Some(0));
    }

    #[test]
    fn test_plans_start_on_recommended() {
        let app = app();
        assert!(app.selected_plan().map(|p| p.recommended).unwrap_or(false));
    }
}
