//! Datastore Console Library
//!
//! Route layer, rate limiter and upstream client used by the server binary,
//! plus the console state store that drives the admin UI against those routes.

pub mod clients;
pub mod config;
pub mod console;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::AppSettings;
pub use error::AppError;
