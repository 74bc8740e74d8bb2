//! Core types, config, and errors for Blindsight.

pub mod config;
pub mod error;
pub mod types;
