//! # FAQ Pipeline Common Library
//!
//! Shared code for the FAQ training pipeline:
//! - Error type used by every storage and configuration call
//! - Configuration loading (TOML file, root folder resolution)
//! - Database initialization and additive schema synchronization
//! - Pipeline event types and the broadcast EventBus
//! - Stable key hashing and timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod keys;
pub mod time;

pub use error::{Error, Result};
