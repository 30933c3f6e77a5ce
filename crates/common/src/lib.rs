//! Shared building blocks for the notification dispatcher: configuration,
//! error taxonomy, domain types and recipient formatting.

pub mod config;
pub mod db;
pub mod error;
pub mod formatter;
pub mod types;
