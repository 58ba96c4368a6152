//! Model module.
//!
//! Contains the shared entity columns and the generic repository.

pub mod base;

pub use base::*;
