use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::error::TrackerError;
use crate::orchestrator::{CancelToken, CellOutcome, ProgressEvent, ProgressSink};

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Download,
    Prepare,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Download => "Download",
            Operation::Prepare => "Prepare",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Progress,
    Logs,
}

#[derive(Debug)]
struct DashboardState {
    status: String,
    processed: u64,
    total: u64,
    skipped: u64,
    empty: u64,
    started: Instant,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    cancelling: bool,
    view: View,
}

/// Full-screen progress view for long-running commands.
pub struct Tui {
    operation: Operation,
    state: Arc<Mutex<DashboardState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<DashboardState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let message = event.message.trim().to_string();
        if event.total > 0 {
            state.processed = event.processed;
            state.total = event.total;
        }
        match event.outcome {
            Some(CellOutcome::Skipped) => state.skipped = state.skipped.saturating_add(1),
            Some(CellOutcome::Empty) => state.empty = state.empty.saturating_add(1),
            Some(CellOutcome::Fetched) | None => {}
        }
        if !state.cancelling {
            state.status = message.clone();
        }
        push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
        push_bounded(
            &mut state.logs,
            format!("[{}] {message}", timestamp()),
            LOGS_MAX,
        );
    }
}

impl Tui {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            state: Arc::new(Mutex::new(DashboardState {
                status: "starting".to_string(),
                processed: 0,
                total: 0,
                skipped: 0,
                empty: 0,
                started: Instant::now(),
                events: VecDeque::new(),
                logs: VecDeque::new(),
                cancelling: false,
                view: View::Progress,
            })),
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread while drawing its progress.
    ///
    /// `q`, `Esc` or `Ctrl-C` trip `cancel`; the worker decides how far to
    /// wind down and its result is still returned.
    pub fn run<F, R>(&mut self, cancel: CancelToken, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, TrackerError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let outcome = loop {
            if let Ok(state) = self.state.lock() {
                let drawn =
                    terminal.draw(|frame| draw_ui(frame, self.operation, &state, self.log_scroll));
                if let Err(err) = drawn {
                    break Err(self.abandon_worker(&cancel, err));
                }
            }

            match rx.try_recv() {
                Ok(result) => break result.map_err(miette::Report::new),
                Err(mpsc::TryRecvError::Disconnected) => {
                    break Err(miette::Report::msg("worker thread exited without a result"));
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }

            match event::poll(Duration::from_millis(120)) {
                Ok(true) => {
                    if let Ok(Event::Key(key)) = event::read() {
                        self.handle_key(key, &cancel);
                    }
                }
                Ok(false) => {}
                Err(err) => break Err(self.abandon_worker(&cancel, err)),
            }
        };

        disable_raw_mode().into_diagnostic()?;
        io::stdout()
            .execute(LeaveAlternateScreen)
            .into_diagnostic()?;
        handle.join().ok();
        outcome
    }

    fn handle_key(&mut self, key: KeyEvent, cancel: &CancelToken) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        let ctrl_c =
            key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.request_cancel(cancel),
            _ if ctrl_c => self.request_cancel(cancel),
            KeyCode::Tab | KeyCode::F(4) => {
                if let Ok(mut state) = self.state.lock() {
                    state.view = match state.view {
                        View::Progress => View::Logs,
                        View::Logs => View::Progress,
                    };
                }
            }
            KeyCode::PageUp => self.scroll_logs(5),
            KeyCode::PageDown => self.scroll_logs(-5),
            _ => {}
        }
    }

    fn request_cancel(&self, cancel: &CancelToken) {
        cancel.cancel();
        if let Ok(mut state) = self.state.lock() {
            state.cancelling = true;
            state.status = "cancelling, finishing current request".to_string();
        }
    }

    /// The terminal is gone; stop the worker so the join below returns soon.
    fn abandon_worker(&self, cancel: &CancelToken, err: io::Error) -> miette::Report {
        tracing::warn!("terminal error, cancelling worker: {err}");
        self.request_cancel(cancel);
        miette::Report::msg(format!("terminal error: {err}"))
    }

    fn scroll_logs(&mut self, delta: i16) {
        let max = self.state.lock().map(|state| state.logs.len()).unwrap_or(0);
        let max_scroll = max.saturating_sub(1) as i16;
        let next = (self.log_scroll as i16 + delta).clamp(0, max_scroll);
        self.log_scroll = next as u16;
    }
}

fn draw_ui(
    frame: &mut ratatui::Frame,
    operation: Operation,
    state: &DashboardState,
    log_scroll: u16,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(2),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(operation, state), chunks[0]);

    let ratio = if state.total == 0 {
        0.0
    } else {
        (state.processed as f64 / state.total as f64).clamp(0.0, 1.0)
    };
    let gauge_color = if state.cancelling {
        Color::Yellow
    } else {
        Color::Cyan
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(gauge_color))
        .ratio(ratio)
        .label(format!("{}/{}", state.processed, state.total));
    frame.render_widget(gauge, chunks[1]);

    match state.view {
        View::Progress => frame.render_widget(draw_status(state), chunks[2]),
        View::Logs => frame.render_widget(draw_logs(state, log_scroll), chunks[2]),
    }

    let footer = Paragraph::new(Line::from(Span::styled(
        "q/Esc cancel   Tab logs   PgUp/PgDown scroll",
        Style::default().fg(Color::DarkGray),
    )))
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[3]);
}

fn draw_header(operation: Operation, state: &DashboardState) -> Paragraph<'static> {
    let elapsed = state.started.elapsed().as_secs();
    Paragraph::new(Line::from(vec![
        Span::styled(
            "DENGUE-TRACKER",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(operation.label(), Style::default().fg(Color::Cyan)),
        Span::raw(format!(
            "   Elapsed: {:02}:{:02}",
            elapsed / 60,
            elapsed % 60
        )),
    ]))
    .alignment(Alignment::Left)
    .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status(state: &DashboardState) -> Paragraph<'static> {
    let status_color = if state.cancelling {
        Color::Yellow
    } else {
        Color::White
    };
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::styled(state.status.clone(), Style::default().fg(status_color)),
        ]),
        Line::from(vec![
            Span::styled("Skipped: ", Style::default().fg(Color::Gray)),
            Span::styled(state.skipped.to_string(), Style::default().fg(Color::Red)),
            Span::styled("   Empty: ", Style::default().fg(Color::Gray)),
            Span::raw(state.empty.to_string()),
        ]),
        Line::from(Span::styled(
            "Recent events:",
            Style::default().fg(Color::Gray),
        )),
    ];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::NONE))
        .wrap(Wrap { trim: true })
}

fn draw_logs(state: &DashboardState, scroll: u16) -> Paragraph<'static> {
    let visible = 12usize;
    let start = state.logs.len().saturating_sub(scroll as usize + visible);
    let lines: Vec<Line> = state
        .logs
        .iter()
        .skip(start)
        .take(visible)
        .map(|line| Line::from(line.clone()))
        .collect();
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::NONE).title("Logs"))
        .wrap(Wrap { trim: true })
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_events_update_counters() {
        let tui = Tui::new(Operation::Download);
        let sink = TuiProgress {
            state: tui.state.clone(),
        };
        sink.event(ProgressEvent {
            message: "Belo Horizonte 2024/10: no data".to_string(),
            processed: 1,
            total: 4,
            elapsed: None,
            outcome: Some(CellOutcome::Empty),
        });
        sink.event(ProgressEvent {
            message: "Contagem 2024/10: skipped (permanent fetch failure: 404)".to_string(),
            processed: 2,
            total: 4,
            elapsed: None,
            outcome: Some(CellOutcome::Skipped),
        });
        sink.event(ProgressEvent {
            message: "Skipped Hill 2024/10: 3 rows".to_string(),
            processed: 3,
            total: 4,
            elapsed: None,
            outcome: Some(CellOutcome::Fetched),
        });
        sink.event(ProgressEvent::message("loaded city table: no data rows skipped"));

        let state = tui.state.lock().unwrap();
        assert_eq!(state.processed, 3);
        assert_eq!(state.total, 4);
        assert_eq!(state.empty, 1);
        assert_eq!(state.skipped, 1);
        assert_eq!(state.events.len(), 4);
    }

    #[test]
    fn terminal_failure_cancels_worker() {
        let tui = Tui::new(Operation::Download);
        let cancel = CancelToken::new();

        let report = tui.abandon_worker(&cancel, io::Error::other("broken pipe"));

        assert!(cancel.is_cancelled());
        assert!(tui.state.lock().unwrap().cancelling);
        assert!(report.to_string().contains("broken pipe"));
    }

    #[test]
    fn cancel_key_trips_token() {
        let mut tui = Tui::new(Operation::Download);
        let cancel = CancelToken::new();
        tui.handle_key(
            KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE),
            &cancel,
        );
        assert!(cancel.is_cancelled());
        assert!(tui.state.lock().unwrap().cancelling);
    }

    #[test]
    fn bounded_buffer_drops_oldest() {
        let mut buffer = VecDeque::new();
        for i in 0..5 {
            push_bounded(&mut buffer, i.to_string(), 3);
        }
        assert_eq!(buffer, VecDeque::from(vec!["2".to_string(), "3".to_string(), "4".to_string()]));
    }
}
