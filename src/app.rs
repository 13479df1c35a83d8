//! Application state management for Crewdeck.
//!
//! This module contains the core `App` struct that ties the auth
//! controller to the terminal UI: the current route, the login and
//! register forms, and the transient notice line. Route changes follow
//! the guard's verdict on every auth state update.

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::Registration;
use crate::auth::{AuthController, AuthState};
use crate::config::Config;
use crate::routes::Route;

// ============================================================================
// Constants
// ============================================================================

/// Maximum length for text inputs (email, display name, admin token).
const MAX_INPUT_LENGTH: usize = 64;

/// Maximum length for password input.
/// 128 chars accommodates password managers and passphrases.
const MAX_PASSWORD_LENGTH: usize = 128;

// ============================================================================
// Form State
// ============================================================================

/// Login form focus state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    Email,
    Password,
    Submit,
    RegisterLink,
}

impl LoginField {
    pub fn next(&self) -> Self {
        match self {
            LoginField::Email => LoginField::Password,
            LoginField::Password => LoginField::Submit,
            LoginField::Submit => LoginField::RegisterLink,
            LoginField::RegisterLink => LoginField::Email,
        }
    }

    pub fn prev(&self) -> Self {
        match self {
            LoginField::Email => LoginField::RegisterLink,
            LoginField::Password => LoginField::Email,
            LoginField::Submit => LoginField::Password,
            LoginField::RegisterLink => LoginField::Submit,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub focus: Option<LoginField>,
}

impl LoginForm {
    pub fn focus(&self) -> LoginField {
        self.focus.unwrap_or(LoginField::Email)
    }
}

/// Register form focus state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterField {
    DisplayName,
    Email,
    Password,
    ConfirmPassword,
    AdminToggle,
    AdminToken,
    Submit,
    LoginLink,
}

#[derive(Debug, Default)]
pub struct RegisterForm {
    pub display_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub admin_enabled: bool,
    pub admin_token: String,
    pub focus: Option<RegisterField>,
}

impl RegisterForm {
    pub fn focus(&self) -> RegisterField {
        self.focus.unwrap_or(RegisterField::DisplayName)
    }

    /// Move focus forward, skipping the admin token input while the
    /// toggle is off.
    pub fn focus_next(&mut self) {
        let next = match self.focus() {
            RegisterField::DisplayName => RegisterField::Email,
            RegisterField::Email => RegisterField::Password,
            RegisterField::Password => RegisterField::ConfirmPassword,
            RegisterField::ConfirmPassword => RegisterField::AdminToggle,
            RegisterField::AdminToggle if self.admin_enabled => RegisterField::AdminToken,
            RegisterField::AdminToggle => RegisterField::Submit,
            RegisterField::AdminToken => RegisterField::Submit,
            RegisterField::Submit => RegisterField::LoginLink,
            RegisterField::LoginLink => RegisterField::DisplayName,
        };
        self.focus = Some(next);
    }

    pub fn focus_prev(&mut self) {
        let prev = match self.focus() {
            RegisterField::DisplayName => RegisterField::LoginLink,
            RegisterField::Email => RegisterField::DisplayName,
            RegisterField::Password => RegisterField::Email,
            RegisterField::ConfirmPassword => RegisterField::Password,
            RegisterField::AdminToggle => RegisterField::ConfirmPassword,
            RegisterField::AdminToken => RegisterField::AdminToggle,
            RegisterField::Submit if self.admin_enabled => RegisterField::AdminToken,
            RegisterField::Submit => RegisterField::AdminToggle,
            RegisterField::LoginLink => RegisterField::Submit,
        };
        self.focus = Some(prev);
    }

    pub fn clear_secrets(&mut self) {
        self.password.clear();
        self.confirm_password.clear();
        self.admin_token.clear();
    }
}

// ============================================================================
// Main Application Struct
// ============================================================================

/// Main application state container
pub struct App {
    // Core services
    pub config: Config,
    pub auth: AuthController,
    state_rx: watch::Receiver<AuthState>,
    error_rx: watch::Receiver<Option<String>>,

    // UI state
    pub route: Route,
    pub auth_state: AuthState,
    /// Dismissible notice line, fed by auth failures and form validation.
    pub notice: Option<String>,
    pub should_quit: bool,

    pub login: LoginForm,
    pub register: RegisterForm,

    /// Whether the backend profile has been synced for the current
    /// sign-in, so the role card is refreshed once per session.
    profile_synced: bool,
}

impl App {
    pub fn new(config: Config, auth: AuthController) -> Self {
        let state_rx = auth.subscribe();
        let error_rx = auth.subscribe_errors();
        let auth_state = auth.state();

        let mut login = LoginForm::default();
        if let Some(ref email) = config.last_email {
            login.email = email.clone();
            login.focus = Some(LoginField::Password);
        }

        let mut app = Self {
            config,
            auth,
            state_rx,
            error_rx,
            route: Route::Home,
            auth_state,
            notice: None,
            should_quit: false,
            login,
            register: RegisterForm::default(),
            profile_synced: false,
        };
        // The controller may have resolved before the UI came up
        app.apply_route_rules();
        app
    }

    /// Pull pending auth updates into the UI snapshot. Called every tick.
    pub fn poll_auth(&mut self) {
        let mut state_changed = false;
        if self.state_rx.has_changed().unwrap_or(false) {
            self.auth_state = self.state_rx.borrow_and_update().clone();
            state_changed = true;
        }
        if self.error_rx.has_changed().unwrap_or(false) {
            if let Some(error) = self.error_rx.borrow_and_update().clone() {
                self.notice = Some(error);
            }
        }
        if state_changed {
            self.apply_route_rules();
        }
    }

    /// Follow the guard after an auth state change: authenticated users
    /// leave the login/register screens, signed-out users bounce off the
    /// protected home.
    fn apply_route_rules(&mut self) {
        match self.auth_state {
            AuthState::Authenticated(_) => {
                if matches!(self.route, Route::Login | Route::Register) {
                    self.navigate(Route::Home);
                }
                if !self.profile_synced {
                    self.profile_synced = true;
                    let auth = self.auth.clone();
                    tokio::spawn(async move {
                        auth.refresh_profile().await;
                    });
                }
            }
            AuthState::Unauthenticated => {
                self.profile_synced = false;
                if self.route.is_protected() {
                    debug!("Guard redirecting to login");
                    self.route = Route::Login;
                }
            }
            AuthState::Initializing => {}
        }
    }

    pub fn navigate(&mut self, route: Route) {
        if self.route != route {
            self.route = route;
            self.dismiss_notice();
        }
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
        self.auth.clear_error();
    }

    // =========================================================================
    // Form submission
    // =========================================================================

    /// Submit the login form. Validation failures stay local; auth
    /// failures arrive through the controller's error field.
    pub async fn submit_login(&mut self) {
        if let Err(message) = validate_login(&self.login.email, &self.login.password) {
            self.notice = Some(message);
            return;
        }
        self.notice = None;

        let email = self.login.email.clone();
        let password = self.login.password.clone();
        if self.auth.sign_in(&email, &password).await {
            self.config.last_email = Some(email);
            if let Err(e) = self.config.save() {
                warn!(error = %e, "Failed to save config");
            }
            self.login.password.clear();
            self.navigate(Route::Home);
        }
    }

    /// Submit the register form. On success the login screen takes over
    /// with the new email prefilled.
    pub async fn submit_register(&mut self) {
        let registration = match validate_registration(&self.register) {
            Ok(registration) => registration,
            Err(message) => {
                self.notice = Some(message);
                return;
            }
        };
        self.notice = None;

        if self.auth.sign_up(&registration).await {
            self.register.clear_secrets();
            self.login.email = registration.email;
            self.login.focus = Some(LoginField::Password);
            self.navigate(Route::Login);
        }
    }

    pub async fn sign_out(&mut self) {
        self.auth.sign_out().await;
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Mirrors the sign-up form's address check: local part, `@`, a domain
/// with a final label of at least two characters.
pub fn is_valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.contains(' ') {
        return false;
    }
    if domain.contains('@') || domain.contains(' ') {
        return false;
    }
    let Some((host, label)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && label.len() >= 2 && !label.contains('.')
}

/// First failing rule of the login form, in field order.
pub fn validate_login(email: &str, password: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("E-mail is required".to_string());
    }
    if !is_valid_email(email) {
        return Err("E-mail is not valid".to_string());
    }
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    Ok(())
}

/// First failing rule of the register form, in field order. A passing
/// form yields the wire payload.
pub fn validate_registration(form: &RegisterForm) -> Result<Registration, String> {
    if form.display_name.is_empty() {
        return Err("Display Name is required".to_string());
    }
    if form.email.is_empty() {
        return Err("E-mail is required".to_string());
    }
    if !is_valid_email(&form.email) {
        return Err("E-mail is not valid".to_string());
    }
    if form.password.is_empty() {
        return Err("Password is required".to_string());
    }
    if form.confirm_password.is_empty() {
        return Err("Confirm Password is required".to_string());
    }
    if form.confirm_password != form.password {
        return Err("Passwords do not match".to_string());
    }
    if form.admin_enabled && form.admin_token.is_empty() {
        return Err("Admin Token is required if enabled".to_string());
    }

    Ok(Registration {
        email: form.email.clone(),
        password: form.password.clone(),
        display_name: form.display_name.clone(),
        admin_token: if form.admin_enabled {
            Some(form.admin_token.clone())
        } else {
            None
        },
        system_location: None,
    })
}

fn is_valid_input_char(c: char) -> bool {
    // Allow printable ASCII and common extended chars, reject control chars
    !c.is_control()
}

/// Check if a text field character should be accepted
pub fn can_add_input_char(current_len: usize, c: char) -> bool {
    current_len < MAX_INPUT_LENGTH && is_valid_input_char(c)
}

/// Check if a password character should be accepted
pub fn can_add_password_char(current_len: usize, c: char) -> bool {
    current_len < MAX_PASSWORD_LENGTH && is_valid_input_char(c)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Email Validation Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_is_valid_email_accepts_common_addresses() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last@sub.domain.org"));
        assert!(is_valid_email("x@y.co"));
    }

    #[test]
    fn test_is_valid_email_rejects_malformed_addresses() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("plainaddress"));
        assert!(!is_valid_email("@b.com")); // empty local part
        assert!(!is_valid_email("a@.com")); // empty host
        assert!(!is_valid_email("a@b")); // no dot
        assert!(!is_valid_email("a@b.c")); // final label too short
        assert!(!is_valid_email("a b@c.com")); // space in local part
        assert!(!is_valid_email("a@b c.com")); // space in domain
    }

    // -------------------------------------------------------------------------
    // Form Validation Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_login_field_order() {
        assert_eq!(
            validate_login("", "pw").unwrap_err(),
            "E-mail is required"
        );
        assert_eq!(
            validate_login("nope", "pw").unwrap_err(),
            "E-mail is not valid"
        );
        assert_eq!(
            validate_login("a@b.com", "").unwrap_err(),
            "Password is required"
        );
        assert!(validate_login("a@b.com", "pw").is_ok());
    }

    fn filled_register_form() -> RegisterForm {
        RegisterForm {
            display_name: "Ada".to_string(),
            email: "a@b.com".to_string(),
            password: "secret".to_string(),
            confirm_password: "secret".to_string(),
            admin_enabled: false,
            admin_token: String::new(),
            focus: None,
        }
    }

    #[test]
    fn test_validate_registration_required_fields() {
        let mut form = filled_register_form();
        form.display_name.clear();
        assert_eq!(
            validate_registration(&form).unwrap_err(),
            "Display Name is required"
        );

        let mut form = filled_register_form();
        form.confirm_password.clear();
        assert_eq!(
            validate_registration(&form).unwrap_err(),
            "Confirm Password is required"
        );
    }

    #[test]
    fn test_validate_registration_password_mismatch() {
        let mut form = filled_register_form();
        form.confirm_password = "different".to_string();
        assert_eq!(
            validate_registration(&form).unwrap_err(),
            "Passwords do not match"
        );
    }

    #[test]
    fn test_validate_registration_admin_token_rule() {
        let mut form = filled_register_form();
        form.admin_enabled = true;
        assert_eq!(
            validate_registration(&form).unwrap_err(),
            "Admin Token is required if enabled"
        );

        form.admin_token = "letmein".to_string();
        let registration = validate_registration(&form).unwrap();
        assert_eq!(registration.admin_token.as_deref(), Some("letmein"));
    }

    #[test]
    fn test_validate_registration_ignores_token_when_toggle_off() {
        let mut form = filled_register_form();
        form.admin_enabled = false;
        form.admin_token = "leftover".to_string();
        let registration = validate_registration(&form).unwrap();
        assert!(registration.admin_token.is_none());
    }

    // -------------------------------------------------------------------------
    // Focus Cycling Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_login_field_cycle() {
        assert_eq!(LoginField::Email.next(), LoginField::Password);
        assert_eq!(LoginField::Password.next(), LoginField::Submit);
        assert_eq!(LoginField::Submit.next(), LoginField::RegisterLink);
        assert_eq!(LoginField::RegisterLink.next(), LoginField::Email); // Wraps around
        assert_eq!(LoginField::Email.prev(), LoginField::RegisterLink); // Wraps around
    }

    #[test]
    fn test_register_focus_skips_token_when_disabled() {
        let mut form = filled_register_form();
        form.focus = Some(RegisterField::AdminToggle);
        form.focus_next();
        assert_eq!(form.focus(), RegisterField::Submit);

        form.focus_prev();
        assert_eq!(form.focus(), RegisterField::AdminToggle);
    }

    #[test]
    fn test_register_focus_visits_token_when_enabled() {
        let mut form = filled_register_form();
        form.admin_enabled = true;
        form.focus = Some(RegisterField::AdminToggle);
        form.focus_next();
        assert_eq!(form.focus(), RegisterField::AdminToken);
        form.focus_next();
        assert_eq!(form.focus(), RegisterField::Submit);
    }

    // -------------------------------------------------------------------------
    // Input Validation Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_can_add_input_char() {
        assert!(can_add_input_char(0, 'a'));
        assert!(can_add_input_char(63, 'z'));
        assert!(!can_add_input_char(64, 'a'));
        assert!(!can_add_input_char(0, '\x00'));
        assert!(!can_add_input_char(0, '\n'));
    }

    #[test]
    fn test_can_add_password_char() {
        assert!(can_add_password_char(0, 'a'));
        assert!(can_add_password_char(127, '!'));
        assert!(!can_add_password_char(128, 'a'));
        assert!(!can_add_password_char(0, '\r'));
    }
}
