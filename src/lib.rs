//! Converts (possibly encrypted) image archives into paginated PDF documents.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
