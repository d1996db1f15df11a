//! Topic: a named registry query plus the keywords attached to it.
//!
//! Topics are configuration, not stored state. Only their identifiers are
//! persisted, as the far end of trial↔topic associations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, error::ensure_weight};

// ─── Keywords ────────────────────────────────────────────────────────────────

/// A keyword that raises a trial's interestingness when it matches.
///
/// Deserialises from a bare string (`"biomarker"`) or from a table with an
/// explicit weight (`{ keyword = "CAR-T", weight = 12 }`). A missing weight
/// means "use the scoring configuration's default".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawKeyword")]
pub struct InterestKeyword {
  pub keyword: String,
  pub weight:  Option<f64>,
}

impl InterestKeyword {
  pub fn new(keyword: impl Into<String>) -> Self {
    Self { keyword: keyword.into(), weight: None }
  }

  pub fn weighted(keyword: impl Into<String>, weight: f64) -> Self {
    Self { keyword: keyword.into(), weight: Some(weight) }
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKeyword {
  Bare(String),
  Weighted(WeightedKeyword),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WeightedKeyword {
  keyword: String,
  #[serde(default)]
  weight:  Option<f64>,
}

impl From<RawKeyword> for InterestKeyword {
  fn from(raw: RawKeyword) -> Self {
    match raw {
      RawKeyword::Bare(keyword) => Self { keyword, weight: None },
      RawKeyword::Weighted(WeightedKeyword { keyword, weight }) => {
        Self { keyword, weight }
      }
    }
  }
}

// ─── TopicConfig ─────────────────────────────────────────────────────────────

/// One tracked slice of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicConfig {
  /// Stable identifier; persisted on trial associations.
  pub id:                   String,
  /// Query parameters sent verbatim to the registry search endpoint.
  #[serde(default)]
  pub query:                BTreeMap<String, String>,
  /// Labels for editors; never affect scores.
  #[serde(default)]
  pub tag_keywords:         Vec<String>,
  /// Scoring input for interestingness.
  #[serde(default)]
  pub interesting_keywords: Vec<InterestKeyword>,
}

impl TopicConfig {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id:                   id.into(),
      query:                BTreeMap::new(),
      tag_keywords:         Vec::new(),
      interesting_keywords: Vec::new(),
    }
  }

  /// Query parameters as owned pairs, in key order.
  pub fn query_params(&self) -> Vec<(String, String)> {
    self
      .query
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  /// The tag keywords that occur (case-insensitively) in `text`.
  pub fn matching_tags<'a>(&'a self, text: &str) -> Vec<&'a str> {
    let haystack = text.to_lowercase();
    self
      .tag_keywords
      .iter()
      .filter(|tag| haystack.contains(&tag.to_lowercase()))
      .map(String::as_str)
      .collect()
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.id.trim().is_empty() {
      return Err(ConfigError::EmptyTopicId);
    }
    if self.query.is_empty() {
      return Err(ConfigError::EmptyQuery(self.id.clone()));
    }
    if self.tag_keywords.iter().any(|t| t.trim().is_empty()) {
      return Err(ConfigError::EmptyKeyword {
        topic: self.id.clone(),
        list:  "tag_keywords",
      });
    }
    for kw in &self.interesting_keywords {
      if kw.keyword.trim().is_empty() {
        return Err(ConfigError::EmptyKeyword {
          topic: self.id.clone(),
          list:  "interesting_keywords",
        });
      }
      if let Some(weight) = kw.weight {
        ensure_weight(
          &format!("topics.{}.interesting_keywords.{}", self.id, kw.keyword),
          weight,
        )?;
      }
    }
    Ok(())
  }
}

/// Validate a full topic list: non-empty, each topic valid, ids unique.
pub fn validate_topics(topics: &[TopicConfig]) -> Result<(), ConfigError> {
  if topics.is_empty() {
    return Err(ConfigError::NoTopics);
  }
  let mut seen = BTreeSet::new();
  for topic in topics {
    topic.validate()?;
    if !seen.insert(topic.id.as_str()) {
      return Err(ConfigError::DuplicateTopic(topic.id.clone()));
    }
  }
  Ok(())
}

/// Pick the topics named in `names`, in configuration order. An empty
/// selection means every topic.
pub fn select_topics<'a>(
  topics: &'a [TopicConfig],
  names: &[String],
) -> Result<Vec<&'a TopicConfig>, ConfigError> {
  if names.is_empty() {
    return Ok(topics.iter().collect());
  }
  if let Some(unknown) = names
    .iter()
    .find(|name| !topics.iter().any(|t| &t.id == *name))
  {
    return Err(ConfigError::UnknownTopic(unknown.clone()));
  }
  Ok(topics.iter().filter(|t| names.contains(&t.id)).collect())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn oncology() -> TopicConfig {
    let mut topic = TopicConfig::new("oncology-phase3");
    topic.query.insert("query.cond".into(), "oncology".into());
    topic.query.insert("filter.phase".into(), "PHASE3".into());
    topic
  }

  #[test]
  fn keywords_accept_bare_and_weighted_forms() {
    let parsed: Vec<InterestKeyword> = serde_json::from_str(
      r#"["biomarker", {"keyword": "CAR-T", "weight": 12}, {"keyword": "ADC"}]"#,
    )
    .unwrap();
    assert_eq!(parsed, vec![
      InterestKeyword::new("biomarker"),
      InterestKeyword::weighted("CAR-T", 12.0),
      InterestKeyword::new("ADC"),
    ]);
  }

  #[test]
  fn keyword_tables_reject_unknown_keys() {
    let parsed: Result<InterestKeyword, _> =
      serde_json::from_str(r#"{"keyword": "x", "wieght": 3}"#);
    assert!(parsed.is_err());
  }

  #[test]
  fn topic_rejects_unknown_keys() {
    let parsed: Result<TopicConfig, _> =
      serde_json::from_str(r#"{"id": "a", "query": {"q": "x"}, "tags": []}"#);
    assert!(parsed.is_err());
  }

  #[test]
  fn validate_topics_catches_problems() {
    assert_eq!(validate_topics(&[]), Err(ConfigError::NoTopics));

    let no_query = TopicConfig::new("empty");
    assert_eq!(
      validate_topics(&[no_query]),
      Err(ConfigError::EmptyQuery("empty".into()))
    );

    assert_eq!(
      validate_topics(&[oncology(), oncology()]),
      Err(ConfigError::DuplicateTopic("oncology-phase3".into()))
    );

    let mut negative = oncology();
    negative
      .interesting_keywords
      .push(InterestKeyword::weighted("biomarker", -1.0));
    assert!(matches!(
      validate_topics(&[negative]),
      Err(ConfigError::Invalid { .. })
    ));

    assert_eq!(validate_topics(&[oncology()]), Ok(()));
  }

  #[test]
  fn select_topics_by_name() {
    let mut other = oncology();
    other.id = "cardio".into();
    let topics = vec![oncology(), other];

    assert_eq!(select_topics(&topics, &[]).unwrap().len(), 2);
    let picked = select_topics(&topics, &["cardio".into()]).unwrap();
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].id, "cardio");
    assert_eq!(
      select_topics(&topics, &["nope".into()]).unwrap_err(),
      ConfigError::UnknownTopic("nope".into())
    );
  }

  #[test]
  fn tags_match_case_insensitively() {
    let mut topic = oncology();
    topic.tag_keywords = vec!["Melanoma".into(), "lung".into()];
    assert_eq!(topic.matching_tags("Advanced MELANOMA study"), vec!["Melanoma"]);
  }
}
