//! # Inspect Common Library
//!
//! Shared code for the inspection client services:
//! - Error and result types
//! - Bootstrap configuration loading (TOML + environment + defaults)
//! - Logging initialization

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
