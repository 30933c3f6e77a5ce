//! Thin axum HTTP surface over the dispatch engine, template service,
//! preference service and provider registry.

pub mod routes;
pub mod state;
