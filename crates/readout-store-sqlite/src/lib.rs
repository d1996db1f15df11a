//! SQLite backend for the readout tracker.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. That single connection thread, plus an
//! immediate transaction per trial, is what serialises concurrent upserts.

mod diff;
mod encode;
mod schema;
mod store;

pub mod error;

pub use diff::ChangeDetection;
pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
