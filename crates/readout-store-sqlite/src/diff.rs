//! Snapshot comparison: fingerprints and field-level diffs.
//!
//! A snapshot is the JSON object produced by [`readout_core::Trial::snapshot`].
//! Both the fingerprint and the diff skip the configured volatile fields, so
//! a re-fetch that only moves noise is classified as unchanged.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Which top-level snapshot fields never count as a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeDetection {
  pub volatile_fields: Vec<String>,
}

impl ChangeDetection {
  pub fn is_volatile(&self, field: &str) -> bool {
    self.volatile_fields.iter().any(|f| f == field)
  }

  /// SHA-256 hex digest over the non-volatile fields of `snapshot`.
  ///
  /// Stable: `serde_json` maps are key-ordered, so equal field sets always
  /// serialise identically.
  pub fn fingerprint(&self, snapshot: &Value) -> String {
    let relevant: Map<String, Value> = match snapshot {
      Value::Object(fields) => fields
        .iter()
        .filter(|(k, _)| !self.is_volatile(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
      other => Map::from_iter([(String::new(), other.clone())]),
    };

    let mut hasher = Sha256::new();
    hasher.update(Value::Object(relevant).to_string().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Names of the non-volatile top-level fields that differ between the
  /// stored snapshot text and `incoming`, in name order.
  ///
  /// A missing field and an explicit `null` compare equal. A stored snapshot
  /// that no longer parses as an object reports `raw_snapshot` as changed so
  /// it gets rewritten.
  pub fn changed_fields(&self, stored: &str, incoming: &Value) -> Vec<String> {
    let Ok(Value::Object(old)) = serde_json::from_str::<Value>(stored) else {
      return vec!["raw_snapshot".to_owned()];
    };
    let Value::Object(new) = incoming else {
      return vec!["raw_snapshot".to_owned()];
    };

    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys
      .into_iter()
      .filter(|k| !self.is_volatile(k))
      .filter(|k| {
        old.get(*k).unwrap_or(&Value::Null) != new.get(*k).unwrap_or(&Value::Null)
      })
      .cloned()
      .collect()
  }
}
