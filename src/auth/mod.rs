//! Authentication module: session lifecycle from sign-in to sign-out.
//!
//! This module provides:
//! - `Session`: the persisted record of the signed-in user
//! - `SessionStore`: local key/value storage backing it
//! - `IdentityProvider` / `IdentityClient`: the identity service seam
//! - `AuthController`: the single owner of the authentication state

pub mod controller;
pub mod provider;
pub mod session;
pub mod store;

pub use controller::{AuthController, AuthState};
pub use provider::{AuthChange, IdentityClient, IdentityProvider, Principal, ProviderError};
pub use session::{Session, SESSION_KEY};
pub use store::SessionStore;
