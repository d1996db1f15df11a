//! Core types and trait definitions for the readout tracker.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Every other crate depends on it: the registry client produces [`Trial`]s,
//! the scoring engine reads them, and storage backends implement
//! [`store::TrialStore`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod citation;
pub mod error;
pub mod store;
pub mod sync;
pub mod topic;
pub mod trial;

pub use error::{ConfigError, Error, Result};
pub use trial::Trial;
