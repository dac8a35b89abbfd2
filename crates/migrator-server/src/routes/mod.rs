//! HTTP route handlers.

pub mod health;
pub mod pattern;
pub mod validation;
