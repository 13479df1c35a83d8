//! Crewdeck - a terminal client for the Crewdeck service.
//!
//! This application provides a keyboard-driven interface for signing in
//! to a Crewdeck backend, with session persistence and automatic token
//! refresh in the background.

mod app;
mod auth;
mod api;
mod config;
mod routes;
mod ui;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use api::ApiClient;
use app::App;
use auth::{AuthController, IdentityClient, IdentityProvider, SessionStore};
use config::Config;
use ui::input::handle_input;
use ui::render::render;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for polling terminal events (in milliseconds)
const EVENT_POLL_TIMEOUT_MS: u64 = 100;

/// Initialize the tracing subscriber with a file writer.
///
/// Logs go to a file rather than stderr because the TUI owns the
/// terminal. Use RUST_LOG to control the log level (e.g. RUST_LOG=debug).
/// The returned guard must stay alive for the writer to flush.
fn init_tracing(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = config.log_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let file = tracing_appender::rolling::never(log_dir, "crewdeck.log");
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();

    Ok(guard)
}

/// Wire the session store, identity provider, API client and auth
/// controller together.
async fn build_controller(config: &Config) -> Result<AuthController> {
    let store = SessionStore::new(config.storage_dir()?);
    let provider: Arc<dyn IdentityProvider> = Arc::new(IdentityClient::new(
        config.identity_url.clone(),
        config.identity_api_key.clone(),
        store.clone(),
    )?);

    let (revoked_tx, revoked_rx) = mpsc::unbounded_channel();
    let api = ApiClient::new(&config.api_base_url, store.clone(), provider.clone(), revoked_tx)?;

    Ok(AuthController::start(provider, store, api, revoked_rx).await)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let _guard = init_tracing(&config)?;

    // Check for CLI commands
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--login" {
        return login_cli(config).await;
    }
    if args.len() > 1 && args[1] == "--logout" {
        return logout_cli(config).await;
    }

    info!("Crewdeck starting");

    let controller = build_controller(&config).await?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, controller);

    // Main loop
    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    info!("Crewdeck shutting down");
    Ok(())
}

/// Sign in from the terminal without starting the TUI.
async fn login_cli(mut config: Config) -> Result<()> {
    let controller = build_controller(&config).await?;

    print!("E-mail: ");
    io::stdout().flush()?;
    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim().to_string();

    let password = rpassword::prompt_password("Password: ")?;

    if !controller.sign_in(&email, &password).await {
        let error = controller
            .last_error()
            .unwrap_or_else(|| "Sign-in failed".to_string());
        anyhow::bail!(error);
    }
    match controller.session() {
        Some(session) => {
            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Signed in as {}", session.display_label());
            Ok(())
        }
        None => anyhow::bail!("Sign-in did not complete"),
    }
}

/// Clear the stored session, revoking the refresh token if possible.
async fn logout_cli(config: Config) -> Result<()> {
    let controller = build_controller(&config).await?;
    controller.sign_out().await;
    println!("Signed out");
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        // Draw UI
        terminal.draw(|f| render(f, app))?;

        // Poll for events with timeout to allow background updates
        if event::poll(Duration::from_millis(EVENT_POLL_TIMEOUT_MS))? {
            if let Event::Key(key) = event::read()? {
                if handle_input(app, key).await? {
                    return Ok(());
                }
            }
        }

        // Pull pending auth updates into the UI
        app.poll_auth();

        if app.should_quit {
            return Ok(());
        }
    }
}
