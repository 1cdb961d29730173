use crate::dashboard::{Dashboard, MountTarget};
use crate::instances::{visible_controls, ControlRole, Hit};
use crate::registry::{InstanceRegistry, InstanceView};
use cdash_core::{InstanceStatus, LogEntry};
use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use std::io::{self, IsTerminal};

const ADD_LABEL: &str = "[ + Create new instance ]";
const ADD_PROCESSING_LABEL: &str = "[ ~ creating instance.. ]";
const ID_WIDTH: usize = 12;
const STATUS_WIDTH: usize = 9;
/// Marker, id column and status badge preceding the controls on a card.
const CARD_PREFIX_WIDTH: u16 = (2 + ID_WIDTH + 1 + STATUS_WIDTH + 1) as u16;
const CARDS_TOP_OFFSET: u16 = 2;

#[derive(Clone, Copy)]
pub struct Theme {
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
    info: Color,
}

pub fn theme() -> Theme {
    Theme {
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
        info: Color::Rgb(59, 130, 246),
    }
}

/// A container drawn inside the shared chrome.
pub trait Panel {
    fn header(&self) -> String;
    fn body(&self, frame: &mut ratatui::Frame, area: Rect, theme: Theme);
}

fn chrome(title: String, border: Color, theme: Theme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            title,
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn chrome_inner(area: Rect) -> Rect {
    Block::default().borders(Borders::ALL).inner(area)
}

pub fn render_panel(frame: &mut ratatui::Frame, panel: &dyn Panel, area: Rect, theme: Theme) {
    let block = chrome(panel.header(), theme.border, theme);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    panel.body(frame, inner, theme);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardLayout {
    pub index: usize,
    pub instance_id: String,
    pub row: Rect,
    pub controls: Vec<(ControlRole, Rect)>,
}

/// Screen regions of the instances panel. Rendering and mouse hit testing
/// both go through this so they cannot disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstancesLayout {
    pub add: Rect,
    pub cards: Vec<CardLayout>,
}

impl InstancesLayout {
    pub fn compute(area: Rect, rows: &[InstanceView], selected: usize) -> Self {
        let inner = chrome_inner(area);
        if inner.height == 0 || inner.width == 0 {
            return Self::default();
        }
        let add = Rect {
            x: inner.x,
            y: inner.y,
            width: (ADD_LABEL.len() as u16).min(inner.width),
            height: 1,
        };
        let visible = inner.height.saturating_sub(CARDS_TOP_OFFSET) as usize;
        let scroll = if visible > 0 && selected >= visible {
            selected + 1 - visible
        } else {
            0
        };
        let right = inner.x.saturating_add(inner.width);
        let cards = rows
            .iter()
            .enumerate()
            .skip(scroll)
            .take(visible)
            .map(|(index, view)| {
                let y = inner.y + CARDS_TOP_OFFSET + (index - scroll) as u16;
                let mut x = inner.x.saturating_add(CARD_PREFIX_WIDTH);
                let mut controls = Vec::new();
                for role in visible_controls(view.status()) {
                    let width = role.label().len() as u16 + 2;
                    if x.saturating_add(width) > right {
                        break;
                    }
                    controls.push((
                        *role,
                        Rect {
                            x,
                            y,
                            width,
                            height: 1,
                        },
                    ));
                    x = x.saturating_add(width + 1);
                }
                CardLayout {
                    index,
                    instance_id: view.id().to_string(),
                    row: Rect {
                        x: inner.x,
                        y,
                        width: inner.width,
                        height: 1,
                    },
                    controls,
                }
            })
            .collect();
        Self { add, cards }
    }

    pub fn hit_test(&self, column: u16, row: u16) -> Hit {
        if contains(self.add, column, row) {
            return Hit::add();
        }
        for card in &self.cards {
            if !contains(card.row, column, row) {
                continue;
            }
            for (role, rect) in &card.controls {
                if contains(*rect, column, row) {
                    return Hit::control(*role, card.instance_id.clone());
                }
            }
            return Hit {
                role: None,
                instance_id: Some(card.instance_id.clone()),
            };
        }
        Hit::nothing()
    }
}

fn contains(rect: Rect, column: u16, row: u16) -> bool {
    column >= rect.x
        && column < rect.x.saturating_add(rect.width)
        && row >= rect.y
        && row < rect.y.saturating_add(rect.height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardAreas {
    pub instances: Rect,
    pub worklog: Rect,
    pub footer: Rect,
}

pub fn dashboard_layout(area: Rect) -> DashboardAreas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(area);
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[0]);
    DashboardAreas {
        instances: columns[0],
        worklog: columns[1],
        footer: rows[1],
    }
}

struct InstancesPanel<'a> {
    registry: &'a InstanceRegistry,
    layout: &'a InstancesLayout,
    selected: usize,
}

impl Panel for InstancesPanel<'_> {
    fn header(&self) -> String {
        let pending = self.registry.processing_count();
        if pending > 0 {
            format!("Instances ({}) - {} pending", self.registry.len(), pending)
        } else {
            format!("Instances ({})", self.registry.len())
        }
    }

    fn body(&self, frame: &mut ratatui::Frame, _area: Rect, theme: Theme) {
        let add = if self.registry.add_processing() {
            Span::styled(
                ADD_PROCESSING_LABEL,
                Style::default()
                    .fg(theme.muted)
                    .add_modifier(Modifier::ITALIC),
            )
        } else {
            Span::styled(
                ADD_LABEL,
                Style::default()
                    .fg(theme.accent)
                    .add_modifier(Modifier::BOLD),
            )
        };
        if self.layout.add.width > 0 {
            frame.render_widget(Paragraph::new(Line::from(add)), self.layout.add);
        }

        if self.registry.is_empty() {
            if let Some(area) = empty_hint_area(self.layout) {
                frame.render_widget(
                    Paragraph::new(Line::from(Span::styled(
                        "No instances yet.",
                        Style::default().fg(theme.muted),
                    ))),
                    area,
                );
            }
            return;
        }

        for card in &self.layout.cards {
            let Some(view) = self.registry.rows().get(card.index) else {
                continue;
            };
            let selected = card.index == self.selected;
            frame.render_widget(
                Paragraph::new(Line::from(card_prefix_spans(view, selected, theme))),
                card.row,
            );
            for (role, rect) in &card.controls {
                let style = if view.processing {
                    Style::default().fg(theme.muted)
                } else {
                    control_style(*role, theme)
                };
                frame.render_widget(
                    Paragraph::new(Line::from(Span::styled(
                        format!("[{}]", role.label()),
                        style,
                    ))),
                    *rect,
                );
            }
        }
    }
}

fn empty_hint_area(layout: &InstancesLayout) -> Option<Rect> {
    let add = layout.add;
    (add.width > 0).then(|| Rect {
        x: add.x,
        y: add.y.saturating_add(CARDS_TOP_OFFSET),
        width: ADD_LABEL.len() as u16,
        height: 1,
    })
}

fn card_prefix_spans(view: &InstanceView, selected: bool, theme: Theme) -> Vec<Span<'static>> {
    let marker = if selected { "> " } else { "  " };
    let mut id = view.id().to_string();
    if id.chars().count() > ID_WIDTH {
        id = id.chars().take(ID_WIDTH - 1).collect::<String>() + "~";
    }
    let id_style = if selected {
        Style::default()
            .fg(theme.text)
            .add_modifier(Modifier::BOLD | Modifier::REVERSED)
    } else {
        Style::default().fg(theme.text)
    };
    let badge = if view.processing {
        Span::styled(
            format!("{:<STATUS_WIDTH$}", "working"),
            Style::default()
                .fg(theme.muted)
                .add_modifier(Modifier::ITALIC),
        )
    } else {
        Span::styled(
            format!("{:<STATUS_WIDTH$}", view.status().as_str()),
            Style::default().fg(status_color(view.status(), theme)),
        )
    };
    vec![
        Span::styled(marker, Style::default().fg(theme.accent)),
        Span::styled(format!("{id:<ID_WIDTH$}"), id_style),
        Span::raw(" "),
        badge,
    ]
}

fn status_color(status: InstanceStatus, theme: Theme) -> Color {
    match status {
        InstanceStatus::Created => theme.info,
        InstanceStatus::Started => theme.ok,
        InstanceStatus::Stopped => theme.warn,
    }
}

fn control_style(role: ControlRole, theme: Theme) -> Style {
    let color = match role {
        ControlRole::Add | ControlRole::Start => theme.ok,
        ControlRole::Stop => theme.warn,
        ControlRole::Remove => theme.critical,
    };
    Style::default().fg(color)
}

struct WorkLogPanel {
    entries: Vec<LogEntry>,
    total: usize,
}

impl Panel for WorkLogPanel {
    fn header(&self) -> String {
        format!("Work log ({})", self.total)
    }

    fn body(&self, frame: &mut ratatui::Frame, area: Rect, theme: Theme) {
        if self.entries.is_empty() {
            frame.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    "Nothing logged yet.",
                    Style::default().fg(theme.muted),
                ))),
                area,
            );
            return;
        }
        let lines: Vec<Line> = self
            .entries
            .iter()
            .map(|entry| {
                Line::from(vec![
                    Span::styled(entry.formatted_time(), Style::default().fg(theme.muted)),
                    Span::raw(" "),
                    Span::styled(
                        format!("[{}]", entry.id),
                        Style::default().fg(theme.accent),
                    ),
                    Span::raw(" "),
                    Span::styled(entry.info.clone(), Style::default().fg(theme.text)),
                ])
            })
            .collect();
        frame.render_widget(Paragraph::new(Text::from(lines)), area);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewState {
    pub selected: usize,
    pub help_open: bool,
}

impl ViewState {
    pub fn clamp(&mut self, rows: usize) {
        if rows == 0 {
            self.selected = 0;
        } else if self.selected >= rows {
            self.selected = rows - 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    None,
    Quit,
    Reload,
    ClearLog,
    Interact(Hit),
}

/// What input handling needs to know about the current session.
#[derive(Debug, Clone, Default)]
pub struct InputContext {
    pub blocked: bool,
    pub ids: Vec<String>,
    pub layout: InstancesLayout,
}

impl InputContext {
    pub fn capture(dashboard: &Dashboard, area: Rect, view: &ViewState) -> Self {
        let registry = dashboard.instances().registry();
        let areas = dashboard_layout(area);
        Self {
            blocked: dashboard.is_blocked(),
            ids: registry.ids().into_iter().map(str::to_string).collect(),
            layout: InstancesLayout::compute(areas.instances, registry.rows(), view.selected),
        }
    }
}

pub fn handle_event(event: &Event, view: &mut ViewState, ctx: &InputContext) -> UiAction {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(key, view, ctx),
        Event::Mouse(mouse) => handle_mouse(mouse, view, ctx),
        _ => UiAction::None,
    }
}

pub fn handle_key(key: &KeyEvent, view: &mut ViewState, ctx: &InputContext) -> UiAction {
    if ctx.blocked {
        return match key.code {
            KeyCode::Char('q') => UiAction::Quit,
            KeyCode::Char('r') => UiAction::Reload,
            _ => UiAction::None,
        };
    }
    if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
        view.help_open = !view.help_open;
        return UiAction::None;
    }
    if key.code == KeyCode::Esc && view.help_open {
        view.help_open = false;
        return UiAction::None;
    }
    if view.help_open {
        return UiAction::None;
    }

    view.clamp(ctx.ids.len());
    let on_selected = |role: ControlRole, id: Option<String>| {
        id.map(|id| UiAction::Interact(Hit::control(role, id)))
            .unwrap_or(UiAction::None)
    };
    let selected = ctx.ids.get(view.selected).cloned();
    match key.code {
        KeyCode::Char('q') => UiAction::Quit,
        KeyCode::Char('a') => UiAction::Interact(Hit::add()),
        KeyCode::Char('c') => UiAction::ClearLog,
        KeyCode::Char('s') => on_selected(ControlRole::Start, selected),
        KeyCode::Char('x') => on_selected(ControlRole::Stop, selected),
        KeyCode::Char('d') => on_selected(ControlRole::Remove, selected),
        KeyCode::Down | KeyCode::Char('j') => {
            if view.selected + 1 < ctx.ids.len() {
                view.selected += 1;
            }
            UiAction::None
        }
        KeyCode::Up | KeyCode::Char('k') => {
            view.selected = view.selected.saturating_sub(1);
            UiAction::None
        }
        KeyCode::Char('g') => {
            view.selected = 0;
            UiAction::None
        }
        _ => UiAction::None,
    }
}

pub fn handle_mouse(mouse: &MouseEvent, view: &mut ViewState, ctx: &InputContext) -> UiAction {
    if ctx.blocked || view.help_open {
        return UiAction::None;
    }
    if mouse.kind != MouseEventKind::Down(MouseButton::Left) {
        return UiAction::None;
    }
    let hit = ctx.layout.hit_test(mouse.column, mouse.row);
    if let Some(id) = hit.instance_id.as_deref() {
        if let Some(index) = ctx.ids.iter().position(|known| known == id) {
            view.selected = index;
        }
    }
    if hit == Hit::nothing() {
        return UiAction::None;
    }
    UiAction::Interact(hit)
}

pub fn render(frame: &mut ratatui::Frame, dashboard: &Dashboard, view: &ViewState) {
    let theme = theme();
    let areas = dashboard_layout(frame.size());
    let registry = dashboard.instances().registry();
    let layout = InstancesLayout::compute(areas.instances, registry.rows(), view.selected);
    render_panel(
        frame,
        &InstancesPanel {
            registry: &registry,
            layout: &layout,
            selected: view.selected,
        },
        areas.instances,
        theme,
    );

    let visible = chrome_inner(areas.worklog).height as usize;
    render_panel(
        frame,
        &WorkLogPanel {
            entries: dashboard.worklog().tail(visible),
            total: dashboard.worklog().len(),
        },
        areas.worklog,
        theme,
    );
    frame.render_widget(render_footer(dashboard, theme), areas.footer);

    if view.help_open {
        render_help_overlay(frame, theme);
    }
    if let Some(notice) = dashboard.notice() {
        render_notice(frame, &notice, theme);
    }
}

fn render_footer(dashboard: &Dashboard, theme: Theme) -> Paragraph<'static> {
    let state = format!("{:?}", dashboard.connection().state()).to_ascii_lowercase();
    let state_color = if dashboard.is_blocked() {
        theme.critical
    } else {
        theme.ok
    };
    Paragraph::new(Line::from(vec![
        Span::styled(format!(" {state} "), Style::default().fg(state_color)),
        Span::styled(
            " a add  s start  x stop  d remove  j/k move  c clear log  ? help  q quit",
            Style::default().fg(theme.muted),
        ),
    ]))
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: Theme) {
    let area = centered_rect(60, 60, frame.size());
    let heading = |text: &'static str| {
        Line::from(Span::styled(
            text,
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ))
    };
    let lines = vec![
        heading("Instances"),
        Line::from("  a        create new instance"),
        Line::from("  s        start selected instance"),
        Line::from("  x        stop selected instance"),
        Line::from("  d        remove selected instance"),
        Line::from("  j/k      move selection"),
        Line::from("  click    press the control under the pointer"),
        Line::from("  c        clear the work log"),
        Line::from(""),
        heading("Session & Exit"),
        Line::from("  ? or F1  toggle this help"),
        Line::from("  Esc      close help"),
        Line::from("  r        reload after the connection is lost"),
        Line::from("  q        quit"),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(chrome("Help".to_string(), theme.border, theme))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn render_notice(frame: &mut ratatui::Frame, notice: &str, theme: Theme) {
    let area = centered_rect(50, 25, frame.size());
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(vec![
            Line::from(""),
            Line::from(Span::styled(
                notice.to_string(),
                Style::default().fg(theme.text),
            )),
        ]))
        .style(Style::default().bg(theme.surface))
        .block(chrome("Disconnected".to_string(), theme.critical, theme))
        .wrap(Wrap { trim: true }),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
        ])
        .split(vertical[1])[1]
}

/// The interactive terminal the dashboard draws on.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalTarget;

impl MountTarget for TerminalTarget {
    fn describe(&self) -> String {
        "stdout terminal".to_string()
    }

    fn is_available(&self) -> bool {
        io::stdout().is_terminal()
    }
}
