//! Orchestration for the readout tracker.
//!
//! Three passes, each generic over a [`readout_core::store::TrialStore`]:
//!
//! - [`SyncOrchestrator`] drives fetch → normalise → upsert per topic and
//!   appends one [`readout_core::sync::SyncRun`] per topic.
//! - [`DigestBuilder`] selects trials by readout window, scores them, and
//!   ranks them for a renderer.
//! - [`link_citations`] enriches stored trials with citations.

pub mod digest;
pub mod error;
pub mod link;
pub mod sync;

#[cfg(test)]
mod testing;

pub use digest::{DigestBuilder, DigestEntry, DigestQuery, DigestSettings};
pub use error::{Error, Result};
pub use link::{LinkReport, link_citations};
pub use sync::{CancelFlag, SyncOrchestrator, SyncReport, SyncState};
