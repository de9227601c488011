//! Configuration module
//!
//! Handles loading the backend configuration file.

mod backend;

pub use backend::*;
