//! Client-side routes and the guard that gates the protected ones.

use crate::auth::AuthState;

/// Screens the dashboard can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Protected home with the role card.
    Home,
    Login,
    Register,
}

/// What the guard decided for a protected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Auth state not settled yet, show the loading splash.
    Loading,
    RedirectToLogin,
    Protected,
}

/// Pure mapping from auth state to guard outcome, re-evaluated every frame.
pub fn resolve(state: &AuthState) -> RouteOutcome {
    match state {
        AuthState::Initializing => RouteOutcome::Loading,
        AuthState::Unauthenticated => RouteOutcome::RedirectToLogin,
        AuthState::Authenticated(_) => RouteOutcome::Protected,
    }
}

impl Route {
    pub fn is_protected(&self) -> bool {
        matches!(self, Route::Home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Principal, Session};

    #[test]
    fn test_guard_maps_all_three_states() {
        assert_eq!(resolve(&AuthState::Initializing), RouteOutcome::Loading);
        assert_eq!(
            resolve(&AuthState::Unauthenticated),
            RouteOutcome::RedirectToLogin
        );

        let principal = Principal {
            uid: "u-1".to_string(),
            email: None,
            display_name: None,
            role: None,
        };
        let session = Session::from_principal(&principal, "tok".to_string());
        assert_eq!(
            resolve(&AuthState::Authenticated(session)),
            RouteOutcome::Protected
        );
    }

    #[test]
    fn test_guard_is_pure() {
        // Same input, same outcome, no state carried between calls.
        for _ in 0..3 {
            assert_eq!(resolve(&AuthState::Initializing), RouteOutcome::Loading);
        }
    }

    #[test]
    fn test_only_home_is_protected() {
        assert!(Route::Home.is_protected());
        assert!(!Route::Login.is_protected());
        assert!(!Route::Register.is_protected());
    }
}
