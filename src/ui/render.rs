use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, LoginField, RegisterField};
use crate::routes::{resolve, Route, RouteOutcome};

use super::styles;

/// Width of text input fields in the form boxes.
const FIELD_WIDTH: usize = 24;

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Min(10),   // Main content
            Constraint::Length(2), // Status bar
        ])
        .split(frame.area());

    render_title_bar(frame, app, chunks[0]);
    render_screen(frame, app, chunks[1]);
    render_status_bar(frame, app, chunks[2]);
}

/// Pick the screen for the current route. The home route defers to the
/// guard, so a stale session never flashes protected content.
fn render_screen(frame: &mut Frame, app: &App, area: Rect) {
    match app.route {
        Route::Login => render_login(frame, app, area),
        Route::Register => render_register(frame, app, area),
        Route::Home => match resolve(&app.auth_state) {
            RouteOutcome::Loading => render_loading(frame, area),
            RouteOutcome::RedirectToLogin => render_login(frame, app, area),
            RouteOutcome::Protected => render_dashboard(frame, app, area),
        },
    }
}

fn render_title_bar(frame: &mut Frame, app: &App, area: Rect) {
    let title = "  Crewdeck";
    let who = app
        .auth_state
        .session()
        .map(|s| s.display_label().to_string())
        .unwrap_or_default();

    let title_line = Line::from(vec![
        Span::styled(title, styles::title_style()),
        Span::raw(" ".repeat(
            area.width
                .saturating_sub(title.len() as u16 + who.len() as u16 + 4)
                as usize,
        )),
        Span::styled(who, styles::muted_style()),
    ]);

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(styles::muted_style());

    let paragraph = Paragraph::new(title_line).block(block);
    frame.render_widget(paragraph, area);
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let (context, shortcuts) = match app.route {
        Route::Login => (
            " Sign in to continue ".to_string(),
            " [Tab] Fields | [Enter] Select | [Esc] Quit ",
        ),
        Route::Register => (
            " Create your account ".to_string(),
            " [Tab] Fields | [Space] Toggle | [Esc] Back ",
        ),
        Route::Home => match resolve(&app.auth_state) {
            RouteOutcome::Loading => (" Restoring session ".to_string(), " [q] Quit "),
            RouteOutcome::RedirectToLogin => (
                " Sign in to continue ".to_string(),
                " [Tab] Fields | [Enter] Select | [Esc] Quit ",
            ),
            RouteOutcome::Protected => {
                let who = app
                    .auth_state
                    .session()
                    .map(|s| s.display_label().to_string())
                    .unwrap_or_default();
                (format!(" Signed in as {} ", who), " [s] Sign out | [q] Quit ")
            }
        },
    };

    // On the home screen the notice takes over the left slot; the form
    // screens show it inside their box instead.
    let (left_text, left_style) = match (&app.route, &app.notice) {
        (Route::Home, Some(notice)) => (format!(" {} [Esc] Dismiss ", notice), styles::error_style()),
        _ => (context, styles::muted_style()),
    };

    let width = area.width as usize;
    let padding = width
        .saturating_sub(left_text.len())
        .saturating_sub(shortcuts.len());

    let status_line = Line::from(vec![
        Span::styled(left_text, left_style),
        Span::raw(" ".repeat(padding)),
        Span::styled(shortcuts, styles::muted_style()),
    ]);
    let paragraph = Paragraph::new(status_line).style(styles::status_bar_style());
    frame.render_widget(paragraph, area);
}

// ============================================================================
// Screens
// ============================================================================

fn render_loading(frame: &mut Frame, area: Rect) {
    let box_area = centered_rect_fixed(46, 8, area);
    frame.render_widget(Clear, box_area);

    let mut lines = logo_lines();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "             Loading session...",
        styles::muted_style(),
    )));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(false))
        .style(Style::default());

    frame.render_widget(Paragraph::new(lines).block(block), box_area);
}

fn render_login(frame: &mut Frame, app: &App, area: Rect) {
    let height = if app.notice.is_some() { 14 } else { 12 };
    let box_area = centered_rect_fixed(46, height, area);
    frame.render_widget(Clear, box_area);

    let focus = app.login.focus();
    let mut lines = logo_lines();
    lines.push(Line::from(""));
    lines.push(input_line(
        "E-mail:   ",
        &app.login.email,
        false,
        focus == LoginField::Email,
    ));
    lines.push(input_line(
        "Password: ",
        &app.login.password,
        true,
        focus == LoginField::Password,
    ));
    lines.push(Line::from(""));
    lines.push(button_line("Sign in", focus == LoginField::Submit));
    lines.push(Line::from(""));
    lines.push(link_line(
        "First time here? Register",
        focus == LoginField::RegisterLink,
    ));

    if let Some(ref notice) = app.notice {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(" {}", notice),
            styles::error_style(),
        )));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());

    frame.render_widget(Paragraph::new(lines).block(block), box_area);
}

fn render_register(frame: &mut Frame, app: &App, area: Rect) {
    let form = &app.register;
    let focus = form.focus();

    let mut height = 15;
    if form.admin_enabled {
        height += 1;
    }
    if app.notice.is_some() {
        height += 2;
    }
    let box_area = centered_rect_fixed(46, height, area);
    frame.render_widget(Clear, box_area);

    let mut lines = logo_lines();
    lines.push(Line::from(""));
    lines.push(input_line(
        "Name:     ",
        &form.display_name,
        false,
        focus == RegisterField::DisplayName,
    ));
    lines.push(input_line(
        "E-mail:   ",
        &form.email,
        false,
        focus == RegisterField::Email,
    ));
    lines.push(input_line(
        "Password: ",
        &form.password,
        true,
        focus == RegisterField::Password,
    ));
    lines.push(input_line(
        "Confirm:  ",
        &form.confirm_password,
        true,
        focus == RegisterField::ConfirmPassword,
    ));
    lines.push(switch_line(
        "Enable Admin Token",
        form.admin_enabled,
        focus == RegisterField::AdminToggle,
    ));
    if form.admin_enabled {
        lines.push(input_line(
            "Token:    ",
            &form.admin_token,
            false,
            focus == RegisterField::AdminToken,
        ));
    }
    lines.push(Line::from(""));
    lines.push(button_line("Create account", focus == RegisterField::Submit));
    lines.push(Line::from(""));
    lines.push(link_line(
        "Already have an account? Login",
        focus == RegisterField::LoginLink,
    ));

    if let Some(ref notice) = app.notice {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(" {}", notice),
            styles::error_style(),
        )));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());

    frame.render_widget(Paragraph::new(lines).block(block), box_area);
}

fn render_dashboard(frame: &mut Frame, app: &App, area: Rect) {
    let Some(session) = app.auth_state.session() else {
        return;
    };

    let box_area = centered_rect_fixed(60, 11, area);
    frame.render_widget(Clear, box_area);

    let (title, welcome) = if session.is_admin() {
        (
            "Admin Dashboard",
            format!(
                "Welcome, {}! You have administrative privileges.",
                session.display_label()
            ),
        )
    } else {
        (
            "User Dashboard",
            format!(
                "Welcome, {}! You have standard user access.",
                session.display_label()
            ),
        )
    };

    let role = session.role.as_deref().unwrap_or("user");

    let lines = vec![
        Line::from(Span::styled(format!("  {}", title), styles::title_style())),
        Line::from(""),
        Line::from(Span::styled(format!("  {}", welcome), styles::help_desc_style())),
        Line::from(""),
        Line::from(vec![
            Span::styled("  Role: ", styles::muted_style()),
            Span::styled(role.to_string(), styles::highlight_style()),
        ]),
        Line::from(""),
        button_line("Sign out", false),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());

    frame.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: false }).block(block),
        box_area,
    );
}

// ============================================================================
// Widgets
// ============================================================================

fn logo_lines() -> Vec<Line<'static>> {
    vec![
        Line::from(Span::styled(
            "          ╔═╗╦═╗╔═╗╦ ╦╔╦╗╔═╗╔═╗╦╔═",
            styles::title_style(),
        )),
        Line::from(Span::styled(
            "          ║  ╠╦╝║╣ ║║║ ║║║╣ ║  ╠╩╗",
            styles::title_style(),
        )),
        Line::from(Span::styled(
            "          ╚═╝╩╚═╚═╝╚╩╝═╩╝╚═╝╚═╝╩ ╩",
            styles::title_style(),
        )),
    ]
}

fn input_line(label: &str, value: &str, masked: bool, focused: bool) -> Line<'static> {
    let shown = if masked {
        "*".repeat(value.chars().count().min(FIELD_WIDTH))
    } else {
        value.to_string()
    };
    let display = format!("{:<width$}", shown, width = FIELD_WIDTH);
    let style = if focused {
        styles::selected_style()
    } else {
        styles::input_style()
    };
    let cursor = if focused { "▌" } else { "" };

    Line::from(vec![
        Span::raw("   "),
        Span::styled(format!("{}[", label), styles::muted_style()),
        Span::styled(format!("{}{}", display, cursor), style),
        Span::styled("]", styles::muted_style()),
    ])
}

fn switch_line(label: &str, enabled: bool, focused: bool) -> Line<'static> {
    let marker = if enabled { "[x]" } else { "[ ]" };
    let style = if focused {
        styles::selected_style()
    } else {
        styles::input_style()
    };

    Line::from(vec![
        Span::raw("   "),
        Span::styled(marker.to_string(), style),
        Span::styled(format!(" {}", label), styles::muted_style()),
    ])
}

fn button_line(label: &str, focused: bool) -> Line<'static> {
    let style = if focused {
        styles::selected_style()
    } else {
        styles::input_style()
    };
    let caption = if focused {
        format!(" ▶ {} ◀ ", label)
    } else {
        format!("   {}   ", label)
    };

    Line::from(vec![
        Span::raw("         ["),
        Span::styled(caption, style),
        Span::raw("]"),
    ])
}

fn link_line(text: &str, focused: bool) -> Line<'static> {
    Line::from(vec![
        Span::raw("   "),
        Span::styled(text.to_string(), styles::link_style(focused)),
    ])
}

/// Create a centered rectangle with fixed dimensions
fn centered_rect_fixed(width: u16, height: u16, r: Rect) -> Rect {
    let x = r.x + (r.width.saturating_sub(width)) / 2;
    let y = r.y + (r.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width.min(r.width), height.min(r.height))
}
