//! # TQE Common Library
//!
//! Shared code for the translation quote services:
//! - Common error type
//! - Configuration loading (CLI → ENV → TOML → defaults)
//! - Quote change events and the EventBus
//! - Currency rounding helpers
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod money;
pub mod time;

pub use error::{Error, Result};
