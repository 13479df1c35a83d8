//! HTTP client module for the dashboard backend.
//!
//! This module provides the `ApiClient` request pipeline: the persisted
//! session token travels on every call as a raw `Authorization` header,
//! a 401 earns one refresh-and-resubmit, and a 403 purges the session.

pub mod client;
pub mod error;

pub use client::{ApiClient, Profile, Registration, SessionRevoked};
pub use error::ApiError;
