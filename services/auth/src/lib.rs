//! Email/password authentication service
//!
//! Users register, confirm their email through a one-time link, and then log
//! in to receive a short-lived access token plus a refresh token. Refresh
//! tokens are backed by revocable session records and rotated on every use.

pub mod config;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod models;
pub mod one_time;
pub mod password;
pub mod rate_limiter;
pub mod repositories;
pub mod routes;
pub mod service;
pub mod session;
pub mod tokens;
pub mod validation;

use std::sync::Arc;

use crate::{rate_limiter::RateLimiter, service::AuthService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub rate_limiter: RateLimiter,
}
