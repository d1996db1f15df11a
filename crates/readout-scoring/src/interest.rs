//! Interestingness: keyword and signal-term matches over a trial's text.

use std::collections::BTreeMap;

use readout_core::{
  Trial,
  topic::{InterestKeyword, TopicConfig},
};

use crate::{
  score::{Reason, Score},
  weights::{InterestWeights, MatchMode},
};

/// Lowercase alphanumeric runs of `text`.
fn tokens(text: &str) -> Vec<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| !t.is_empty())
    .map(str::to_lowercase)
    .collect()
}

/// Pre-processed trial text, built once per trial.
pub struct Haystack {
  lowered: String,
  tokens:  Vec<String>,
}

impl Haystack {
  pub fn new(text: &str) -> Self {
    Self { lowered: text.to_lowercase(), tokens: tokens(text) }
  }

  pub fn for_trial(trial: &Trial) -> Self { Self::new(&trial.searchable_text()) }

  pub fn matches(&self, keyword: &str, mode: MatchMode) -> bool {
    match mode {
      MatchMode::Substring => {
        let needle = keyword.trim().to_lowercase();
        !needle.is_empty() && self.lowered.contains(&needle)
      }
      MatchMode::Token => {
        let needle = tokens(keyword);
        !needle.is_empty()
          && self
            .tokens
            .windows(needle.len())
            .any(|window| window == needle.as_slice())
      }
    }
  }
}

/// Merge the interesting keywords of several topics into one list.
///
/// Keywords are deduplicated case-insensitively, the larger resolved weight
/// wins, and the result is ordered by lowercase keyword. Every returned
/// keyword carries an explicit weight.
pub fn union_keywords<'a>(
  topics: impl IntoIterator<Item = &'a TopicConfig>,
  default_weight: f64,
) -> Vec<InterestKeyword> {
  let mut merged: BTreeMap<String, InterestKeyword> = BTreeMap::new();
  for kw in topics.into_iter().flat_map(|t| &t.interesting_keywords) {
    let weight = kw.weight.unwrap_or(default_weight);
    let key = kw.keyword.trim().to_lowercase();
    match merged.get_mut(&key) {
      Some(existing) if existing.weight.unwrap_or(0.0) >= weight => {}
      Some(existing) => existing.weight = Some(weight),
      None => {
        merged.insert(key, InterestKeyword::weighted(kw.keyword.trim(), weight));
      }
    }
  }
  merged.into_values().collect()
}

/// Score a trial's interestingness against `keywords` plus the configured
/// signal terms. No match is a zero score with no reasons.
pub fn score_interest(
  trial: &Trial,
  keywords: &[InterestKeyword],
  w: &InterestWeights,
) -> Score {
  let haystack = Haystack::for_trial(trial);
  let mut matched: Vec<String> = Vec::new();
  let mut contributions = Vec::new();

  for kw in keywords {
    if haystack.matches(&kw.keyword, w.match_mode) {
      matched.push(kw.keyword.to_lowercase());
      contributions.push(Reason::new(
        format!("matched keyword: {}", kw.keyword),
        kw.weight.unwrap_or(w.default_keyword_weight),
      ));
    }
  }

  for term in &w.signal_terms {
    // A term the topic already lists is counted once, as the topic keyword.
    if matched.contains(&term.keyword.to_lowercase()) {
      continue;
    }
    if haystack.matches(&term.keyword, w.match_mode) {
      contributions.push(Reason::new(
        format!("signal term: {}", term.keyword),
        term.weight.unwrap_or(w.default_keyword_weight),
      ));
    }
  }

  Score::from_contributions(contributions, w.cap)
}
