//! Configuration module.

pub mod db;
pub mod env;
pub mod logging;

pub use db::*;
pub use env::*;
pub use logging::*;
