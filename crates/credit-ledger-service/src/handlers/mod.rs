//! API handlers.

pub mod accounts;
pub mod admin;
pub mod credits;
pub mod health;
pub mod live;
pub mod webhooks;
