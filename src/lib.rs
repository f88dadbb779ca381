//! Config Scout - V2Ray Config Harvester and Checker
//!
//! This crate fetches V2Ray share configs from public subscription
//! feeds, decodes them into a typed catalog and probes their health
//! with bounded concurrency, broadcasting live progress to observers.

pub mod report;
pub mod scout;
pub mod snapshot;
pub mod tui;

pub use scout::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
