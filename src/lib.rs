//! Backend service skeleton.
//!
//! Configuration, logging, a MySQL pool, a small service layer and
//! [`wrap`], a set of composable wrappers adding retry, timing and logging
//! around any operation.

pub mod app;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod wrap;

pub use app::Application;
pub use error::{AppError, AppResult};
