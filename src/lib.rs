//! fpl-sync - Resilient synchronization of Fantasy Premier League data
//!
//! This crate pulls fantasy entries and gameweeks from a rate-limited,
//! unreliable upstream API, stores them durably in SQLite, and serves them
//! through a cache-aside layer. Batch syncs isolate per-entity failures and
//! retry only the failed subset for a bounded number of generations.

pub mod cache;
pub mod client;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod models;
pub mod otel;
pub mod sync;
