//! Keyboard input handling for the TUI.
//!
//! This module handles all keyboard events and translates them into
//! application state changes.

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{can_add_input_char, can_add_password_char, App, LoginField, RegisterField};
use crate::routes::Route;

/// Handle keyboard input. Returns true if the app should quit.
pub async fn handle_input(app: &mut App, key: KeyEvent) -> Result<bool> {
    // Ctrl+C quits from anywhere
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return Ok(true);
    }

    match app.route {
        Route::Login => handle_login_input(app, key).await,
        Route::Register => handle_register_input(app, key).await,
        Route::Home => handle_home_input(app, key).await,
    }
}

async fn handle_login_input(app: &mut App, key: KeyEvent) -> Result<bool> {
    match key.code {
        KeyCode::Esc => {
            // First dismiss any notice, then quit
            if app.notice.is_some() {
                app.dismiss_notice();
            } else {
                app.should_quit = true;
                return Ok(true);
            }
        }
        KeyCode::Down | KeyCode::Tab => {
            app.login.focus = Some(app.login.focus().next());
        }
        KeyCode::Up | KeyCode::BackTab => {
            app.login.focus = Some(app.login.focus().prev());
        }
        KeyCode::Enter => match app.login.focus() {
            LoginField::Email => {
                app.login.focus = Some(LoginField::Password);
            }
            LoginField::Password => {
                app.login.focus = Some(LoginField::Submit);
            }
            LoginField::Submit => {
                app.submit_login().await;
            }
            LoginField::RegisterLink => {
                app.navigate(Route::Register);
            }
        },
        KeyCode::Backspace => match app.login.focus() {
            LoginField::Email => {
                app.login.email.pop();
            }
            LoginField::Password => {
                app.login.password.pop();
            }
            _ => {}
        },
        KeyCode::Char(c) => match app.login.focus() {
            LoginField::Email => {
                if can_add_input_char(app.login.email.len(), c) {
                    app.login.email.push(c);
                }
            }
            LoginField::Password => {
                if can_add_password_char(app.login.password.len(), c) {
                    app.login.password.push(c);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(false)
}

async fn handle_register_input(app: &mut App, key: KeyEvent) -> Result<bool> {
    match key.code {
        KeyCode::Esc => {
            if app.notice.is_some() {
                app.dismiss_notice();
            } else {
                app.navigate(Route::Login);
            }
        }
        KeyCode::Down | KeyCode::Tab => {
            app.register.focus_next();
        }
        KeyCode::Up | KeyCode::BackTab => {
            app.register.focus_prev();
        }
        KeyCode::Enter => match app.register.focus() {
            RegisterField::AdminToggle => {
                app.register.admin_enabled = !app.register.admin_enabled;
            }
            RegisterField::Submit => {
                app.submit_register().await;
            }
            RegisterField::LoginLink => {
                app.navigate(Route::Login);
            }
            _ => {
                app.register.focus_next();
            }
        },
        KeyCode::Backspace => match app.register.focus() {
            RegisterField::DisplayName => {
                app.register.display_name.pop();
            }
            RegisterField::Email => {
                app.register.email.pop();
            }
            RegisterField::Password => {
                app.register.password.pop();
            }
            RegisterField::ConfirmPassword => {
                app.register.confirm_password.pop();
            }
            RegisterField::AdminToken => {
                app.register.admin_token.pop();
            }
            _ => {}
        },
        // Space toggles the switch when focused, otherwise it is a
        // regular input character
        KeyCode::Char(' ') if app.register.focus() == RegisterField::AdminToggle => {
            app.register.admin_enabled = !app.register.admin_enabled;
        }
        KeyCode::Char(c) => match app.register.focus() {
            RegisterField::DisplayName => {
                if can_add_input_char(app.register.display_name.len(), c) {
                    app.register.display_name.push(c);
                }
            }
            RegisterField::Email => {
                if can_add_input_char(app.register.email.len(), c) {
                    app.register.email.push(c);
                }
            }
            RegisterField::Password => {
                if can_add_password_char(app.register.password.len(), c) {
                    app.register.password.push(c);
                }
            }
            RegisterField::ConfirmPassword => {
                if can_add_password_char(app.register.confirm_password.len(), c) {
                    app.register.confirm_password.push(c);
                }
            }
            RegisterField::AdminToken => {
                if can_add_input_char(app.register.admin_token.len(), c) {
                    app.register.admin_token.push(c);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(false)
}

async fn handle_home_input(app: &mut App, key: KeyEvent) -> Result<bool> {
    match key.code {
        KeyCode::Char('q') => {
            app.should_quit = true;
            return Ok(true);
        }
        KeyCode::Esc => {
            if app.notice.is_some() {
                app.dismiss_notice();
            }
        }
        KeyCode::Char('s') | KeyCode::Enter => {
            if app.auth_state.is_authenticated() {
                app.sign_out().await;
            }
        }
        _ => {}
    }
    Ok(false)
}
