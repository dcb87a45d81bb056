//! # Auth Module
//!
//! This module handles all authentication-related functionality including:
//! - OAuth authorization-code login for Google, Facebook and GitHub
//! - CSRF state nonces bound to the browser
//! - Session token issuance and the AuthedUser extractor for protected routes

pub mod extractors;
pub mod flow;
pub mod handlers;
pub mod models;
pub mod oauth_state;
pub mod routes;


pub use extractors::AuthedUser;
pub use routes::auth_routes;
