//! External citations attached to a trial by the citation linker.

use serde::{Deserialize, Serialize};

/// A publication that references a trial, keyed by its PubMed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
  pub citation_id: String,
  pub title:       Option<String>,
  pub journal:     Option<String>,
  /// Publication date as the index reports it; not guaranteed ISO 8601.
  pub published:   Option<String>,
  pub doi:         Option<String>,
}

impl Citation {
  pub fn new(citation_id: impl Into<String>) -> Self {
    Self {
      citation_id: citation_id.into(),
      title:       None,
      journal:     None,
      published:   None,
      doi:         None,
    }
  }
}
