//! Notification dispatch core.
//!
//! - [`store`]: document store traits with in-memory and PostgreSQL backends
//! - [`templates`]: template CRUD and rendering
//! - [`preferences`]: per-user consent and quiet hours
//! - [`dispatch`]: the delivery state machine and fallback chain

pub mod dispatch;
pub mod preferences;
pub mod store;
pub mod templates;
