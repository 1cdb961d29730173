use anyhow::Result;
use cdash_dashboard::{
    config::{load_config, Args, Config},
    logging::{init_logging, install_panic_hook, LogGuard},
    ui::{self, InputContext, TerminalTarget, UiAction, ViewState},
    Dashboard, Dispatch, TransportEvent, WebSocketConnector,
};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type DashboardTerminal = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args);
    let log_guard = init_logging(&config);
    install_panic_hook();
    info!(
        event = "dashboard_start",
        url = %config.url,
        log_file = log_guard.as_ref().is_some_and(LogGuard::has_file)
    );

    let (dashboard, transport_rx) = mount_session(&config)?;
    let mut terminal = setup_terminal()?;
    let restore_on_unwind = RestoreOnUnwind;
    let result = run(&mut terminal, &config, dashboard, transport_rx).await;
    std::mem::forget(restore_on_unwind);
    let restored = restore_terminal(&mut terminal);
    info!(event = "dashboard_exit", ok = result.is_ok());
    result.and(restored)
}

/// Leaves raw mode if the event loop unwinds past `restore_terminal`.
struct RestoreOnUnwind;

impl Drop for RestoreOnUnwind {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), DisableMouseCapture, LeaveAlternateScreen);
    }
}

fn mount_session(config: &Config) -> Result<(Dashboard, mpsc::Receiver<TransportEvent>)> {
    let mounted = Dashboard::mount(&TerminalTarget, &config.url, Box::new(WebSocketConnector))?;
    Ok(mounted)
}

fn setup_terminal() -> Result<DashboardTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    if let Err(err) = execute!(stdout, EnterAlternateScreen, EnableMouseCapture) {
        let _ = disable_raw_mode();
        return Err(err.into());
    }
    match Terminal::new(CrosstermBackend::new(stdout)) {
        Ok(terminal) => Ok(terminal),
        Err(err) => {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), DisableMouseCapture, LeaveAlternateScreen);
            Err(err.into())
        }
    }
}

fn restore_terminal(terminal: &mut DashboardTerminal) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run(
    terminal: &mut DashboardTerminal,
    config: &Config,
    mut dashboard: Dashboard,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut view = ViewState::default();

    loop {
        view.clamp(dashboard.instances().registry().len());
        terminal.draw(|frame| ui::render(frame, &dashboard, &view))?;

        let action = tokio::select! {
            Some(event) = transport_rx.recv() => {
                dashboard.handle_transport_event(event);
                UiAction::None
            }
            maybe_event = events.next() => match maybe_event {
                Some(Ok(event)) => {
                    let ctx = InputContext::capture(&dashboard, terminal.size()?, &view);
                    ui::handle_event(&event, &mut view, &ctx)
                }
                Some(Err(err)) => {
                    warn!(event = "terminal_event_error", error = %err);
                    UiAction::None
                }
                None => UiAction::Quit,
            }
        };

        match action {
            UiAction::None => {}
            UiAction::Quit => break,
            UiAction::Reload => {
                info!(event = "dashboard_reload", url = %config.url);
                dashboard.terminate();
                let (next, next_rx) = mount_session(config)?;
                dashboard = next;
                transport_rx = next_rx;
                view = ViewState::default();
            }
            UiAction::ClearLog => dashboard.worklog().clear(),
            UiAction::Interact(hit) => {
                if let Dispatch::Ignored(reason) = dashboard.interact(&hit) {
                    debug!(event = "interaction_ignored", reason = ?reason);
                }
            }
        }
    }

    dashboard.terminate();
    Ok(())
}
