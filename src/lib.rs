//! alertrelay - delivery of alert rule state changes to notification channels
//!
//! This library provides the notifier registry, the built-in channels, and
//! the dispatcher that fans a rule evaluation out to every attached channel
//! with retries, timeouts and per-channel ordering.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod internal_metrics;
pub mod links;
pub mod notification;
pub mod task_manager;
pub mod webhook;

// Re-export core types for convenience
pub use core::*;
