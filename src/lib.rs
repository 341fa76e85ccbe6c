//! # `secretary`
//!
//! Domain model and orchestration core for a personal productivity tracker:
//! tasks, time-tracking records and a hierarchical project tree, labelled
//! with cross-cutting tags and searched through a filter engine.
//!
//! The [`core::Secretary`] facade is the single entry point; it composes the
//! entity managers and keeps cross-entity invariants intact. Persistence goes
//! through the narrow [`storage::TableStore`] interface.

pub mod config;
pub mod core;
pub mod error;
pub mod ids;
pub mod logging;
pub mod models;
pub mod projects;
pub mod query;
pub mod records;
pub mod storage;
pub mod tags;
pub mod tasks;
pub mod tree;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
