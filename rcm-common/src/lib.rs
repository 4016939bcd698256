//! # RCM Common Library
//!
//! Shared code for the Reactor Coking Monitor services including:
//! - Error types
//! - TOML configuration model (connections, topology, tag dictionaries)
//! - Time constants and watermark sentinel
//! - The in-memory time-series frame type
//! - Database pool initialization

pub mod config;
pub mod db;
pub mod error;
pub mod series;
pub mod time;

pub use error::{Error, Result};
pub use series::Frame;
