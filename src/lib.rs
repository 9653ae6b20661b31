//! Feature-flag experiment assignment service.
//!
//! Users are placed into `control` or `treatment` for each flag on their first
//! evaluation, drawn against the flag's rollout percentage, and stay there
//! until an operator resets the flag's assignments.

pub mod admin;
pub mod app_config;
pub mod cache;
pub mod db;
pub mod error;
pub mod middleware;
pub mod orm;
pub mod resolver;
pub mod rollout;
pub mod store;
pub mod web;
