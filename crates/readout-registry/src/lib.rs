//! Registry access for the readout tracker: the fetcher, the normaliser, and
//! the citation lookup client.
//!
//! Everything that touches untyped registry JSON lives in this crate.
//! Callers only ever see [`readout_core::Trial`] values or typed errors.

pub mod citations;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod retry;
pub mod throttle;

pub use citations::{CitationSettings, CitationSource, PubMedClient};
pub use error::{CitationError, FetchError, NormalizationError};
pub use fetch::{FetchSettings, Page, PageRequest, PageSource, RegistryClient, StudyCursor};
pub use normalize::normalize;
pub use throttle::RateBudget;
