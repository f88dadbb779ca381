//! Live probe dashboard driven by the progress bus
//!
//! Runs a fetch and test cycle in the background and renders the
//! progress events it broadcasts: an overall gauge, a rolling probe
//! log, and the per-config results once the cycle completes.

use crate::scout::{ConfigScout, ConfigStats, ConfigStatus};
use crate::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::time::Duration;

/// Maximum number of log lines kept for display
const MAX_LOG_LINES: usize = 100;

/// One finished config as shown in the results column
struct ResultRow {
    name: String,
    status: ConfigStatus,
    ping: Option<f64>,
}

/// Dashboard application state
pub struct DashboardApp {
    scout: Arc<ConfigScout>,
    /// Cap on how many configs the cycle probes
    limit: Option<usize>,
    /// Size of the batch under test
    total: usize,
    /// Probes that have reported completion
    finished: usize,
    /// Rolling probe log (newest last)
    log: VecDeque<String>,
    /// Per-config outcomes, filled once the cycle completes
    results: Vec<ResultRow>,
    stats: Option<ConfigStats>,
    /// Selected column (0 = log, 1 = results)
    selected_list: usize,
    list_state: ListState,
    status_message: String,
    is_complete: bool,
    should_quit: bool,
}

impl DashboardApp {
    pub fn new(scout: Arc<ConfigScout>, limit: Option<usize>) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            scout,
            limit,
            total: 0,
            finished: 0,
            log: VecDeque::new(),
            results: Vec::new(),
            stats: None,
            selected_list: 0,
            list_state,
            status_message: "Starting fetch and test cycle... Press 'q' to quit.".to_string(),
            is_complete: false,
            should_quit: false,
        }
    }

    /// Run the dashboard until the user quits
    pub async fn run(&mut self) -> Result<()> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        // Subscribe before the cycle starts so no event is missed
        let mut subscription = self.scout.bus().subscribe();

        let scout = Arc::clone(&self.scout);
        let limit = self.limit;
        let cycle = tokio::spawn(async move {
            if scout.refresh(None).await.is_ok() {
                let _ = scout.test_all(limit).await;
            }
        });

        loop {
            terminal.draw(|f| self.ui(f))?;

            // Handle key events with a short timeout
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                        if self.should_quit {
                            break;
                        }
                    }
                }
            }

            // Drain whatever the bus delivered since the last frame
            let mut completed = false;
            while let Some(envelope) = subscription.try_recv() {
                completed |= self.apply_event(&envelope);
            }
            if completed {
                self.load_results().await;
            }
        }

        cycle.abort();
        Ok(())
    }

    /// Fold one bus envelope into the display state. Returns true when the
    /// envelope ends the test cycle.
    fn apply_event(&mut self, envelope: &str) -> bool {
        let Ok(event) = serde_json::from_str::<Value>(envelope) else {
            return false;
        };
        match event["type"].as_str() {
            Some("fetch_started") => {
                self.status_message = "Fetching subscription sources...".to_string();
            }
            Some("fetch_completed") => {
                self.status_message = format!(
                    "Fetched {} configs, starting probes...",
                    event["configs_count"]
                );
            }
            Some("test_started") => {
                self.total = event["configs_count"].as_u64().unwrap_or(0) as usize;
                self.finished = 0;
                self.status_message = format!("Probing {} configs...", self.total);
            }
            Some("test_progress") => {
                let id = event["config_id"].as_u64().unwrap_or(0);
                let message = event["message"].as_str().unwrap_or("");
                if message == "test finished" {
                    self.finished += 1;
                    self.status_message = format!(
                        "Probing... {}/{} finished | Press 'q' to quit",
                        self.finished, self.total
                    );
                }
                self.push_log(format!("config {id}: {message}"));
            }
            Some("test_completed") => {
                self.is_complete = true;
                self.stats = serde_json::from_value(event["stats"].clone()).ok();
                if let Some(stats) = self.stats {
                    self.status_message = format!(
                        "Complete! Active: {} | Slow: {} | Dead: {} | Press 'q' to quit",
                        stats.active, stats.slow, stats.dead
                    );
                }
                return true;
            }
            Some("fetch_error") | Some("test_error") => {
                self.is_complete = true;
                self.status_message = format!(
                    "Error: {} | Press 'q' to quit",
                    event["error"].as_str().unwrap_or("unknown")
                );
            }
            _ => {}
        }
        false
    }

    fn push_log(&mut self, line: String) {
        self.log.push_back(line);
        if self.log.len() > MAX_LOG_LINES {
            self.log.pop_front();
        }
    }

    /// Pull the tested configs out of the catalog, fastest first
    async fn load_results(&mut self) {
        let mut tested: Vec<ResultRow> = self
            .scout
            .configs()
            .await
            .into_iter()
            .filter(|config| config.status != ConfigStatus::Untested)
            .map(|config| ResultRow {
                name: config.name,
                status: config.status,
                ping: config.ping,
            })
            .collect();
        tested.sort_by(|a, b| {
            let ping_a = a.ping.unwrap_or(f64::MAX);
            let ping_b = b.ping.unwrap_or(f64::MAX);
            ping_a.total_cmp(&ping_b)
        });
        self.results = tested;
    }

    fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Tab => {
                // Switch between log and results
                self.selected_list = (self.selected_list + 1) % 2;
                self.list_state.select(Some(0));
            }
            KeyCode::Down => {
                let len = self.selected_len();
                let i = match self.list_state.selected() {
                    Some(i) => {
                        if i >= len.saturating_sub(1) {
                            0
                        } else {
                            i + 1
                        }
                    }
                    None => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let len = self.selected_len();
                let i = match self.list_state.selected() {
                    Some(i) => {
                        if i == 0 {
                            len.saturating_sub(1)
                        } else {
                            i - 1
                        }
                    }
                    None => 0,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn selected_len(&self) -> usize {
        if self.selected_list == 0 {
            self.log.len()
        } else {
            self.results.len()
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress bar
                Constraint::Min(0),    // Log and results
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        // Title
        let title = Paragraph::new("Config Scout")
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        // Progress bar
        let progress = if self.total > 0 {
            (self.finished as f64 / self.total as f64 * 100.0) as u16
        } else {
            0
        };
        let progress_label = format!("{}/{} ({}%)", self.finished, self.total, progress);
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(progress)
            .label(progress_label);
        f.render_widget(gauge, chunks[1]);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[2]);

        self.render_log(f, columns[0]);
        self.render_results(f, columns[1]);

        // Status bar
        let status = Paragraph::new(self.status_message.clone())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[3]);
    }

    fn render_log(&mut self, f: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = self
            .log
            .iter()
            .rev() // newest first
            .map(|line| ListItem::new(line.clone()).style(Style::default().fg(Color::Gray)))
            .collect();

        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Probe Log ({})", self.log.len()))
                    .border_style(selected_border(self.selected_list == 0)),
            )
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");

        if self.selected_list == 0 {
            f.render_stateful_widget(list, area, &mut self.list_state);
        } else {
            f.render_widget(list, area);
        }
    }

    fn render_results(&mut self, f: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = self
            .results
            .iter()
            .map(|row| {
                let color = match row.status {
                    ConfigStatus::Active => Color::Green,
                    ConfigStatus::Slow => Color::Yellow,
                    _ => Color::Red,
                };
                let content = if let Some(ping) = row.ping {
                    format!("{} [{}] ({:.0}ms)", row.name, row.status, ping)
                } else {
                    format!("{} [{}]", row.name, row.status)
                };
                ListItem::new(content).style(Style::default().fg(color))
            })
            .collect();

        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Results ({})", self.results.len()))
                    .border_style(selected_border(self.selected_list == 1)),
            )
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");

        if self.selected_list == 1 {
            f.render_stateful_widget(list, area, &mut self.list_state);
        } else {
            f.render_widget(list, area);
        }
    }
}

fn selected_border(is_selected: bool) -> Style {
    if is_selected {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    }
}
