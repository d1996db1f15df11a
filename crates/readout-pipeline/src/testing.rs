//! Scripted registry and citation sources for pipeline tests.

use std::{
  collections::{BTreeSet, HashMap, HashSet},
  sync::Mutex,
};

use chrono::{Days, NaiveDate};
use readout_core::{
  Trial,
  citation::Citation,
  store::{TrackedTrial, TrialStore},
  sync::{SyncRun, UpsertOutcome},
  topic::{InterestKeyword, TopicConfig},
  trial::TrialStatus,
};
use readout_registry::{
  CitationError, CitationSource, FetchError, Page, PageRequest, PageSource, RateBudget,
};
use readout_store_sqlite::SqliteStore;
use serde_json::{Value, json};

use crate::CancelFlag;

pub fn as_of() -> NaiveDate { NaiveDate::from_ymd_opt(2025, 6, 1).unwrap() }

pub fn days_from_now(days: i64) -> String {
  let date = if days >= 0 {
    as_of() + Days::new(days as u64)
  } else {
    as_of() - Days::new(days.unsigned_abs())
  };
  date.to_string()
}

pub async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

pub fn topic(id: &str, keywords: &[&str]) -> TopicConfig {
  let mut t = TopicConfig::new(id);
  t.query.insert("query.term".into(), id.into());
  t.interesting_keywords = keywords.iter().map(|k| InterestKeyword::new(*k)).collect();
  t
}

/// A registry study in the v2 shape.
pub fn study(
  nct_id: &str,
  title: &str,
  completion: Option<&str>,
  sponsor_class: &str,
  enrollment: u32,
) -> Value {
  let mut status = json!({ "overallStatus": "RECRUITING" });
  if let Some(date) = completion {
    status["primaryCompletionDateStruct"] = json!({ "date": date, "type": "ACTUAL" });
  }
  json!({
    "protocolSection": {
      "identificationModule": { "nctId": nct_id, "briefTitle": title },
      "statusModule": status,
      "sponsorCollaboratorsModule": {
        "leadSponsor": { "name": "Sponsor", "class": sponsor_class }
      },
      "designModule": {
        "phases": ["PHASE3"],
        "enrollmentInfo": { "count": enrollment, "type": "ACTUAL" }
      }
    },
    "hasResults": false
  })
}

// ─── Pages ───────────────────────────────────────────────────────────────────

/// Pages keyed by `(topic, token)`; the first page has the empty token.
#[derive(Default)]
pub struct ScriptedSource {
  pages:          HashMap<(String, String), Page>,
  failing_topics: HashSet<String>,
  cancel_on:      Option<(u32, CancelFlag)>,
  requests:       Mutex<u32>,
}

impl ScriptedSource {
  pub fn page(
    mut self,
    topic: &str,
    token: &str,
    studies: Vec<Value>,
    next: Option<&str>,
  ) -> Self {
    self.pages.insert((topic.to_owned(), token.to_owned()), Page {
      studies,
      next_page_token: next.map(str::to_owned),
    });
    self
  }

  pub fn failing(mut self, topic: &str) -> Self {
    self.failing_topics.insert(topic.to_owned());
    self
  }

  /// Raise `flag` while serving request number `request` (1-based).
  pub fn cancelling_on(mut self, request: u32, flag: CancelFlag) -> Self {
    self.cancel_on = Some((request, flag));
    self
  }

  pub fn request_count(&self) -> u32 { *self.requests.lock().unwrap() }
}

impl PageSource for ScriptedSource {
  async fn fetch_page<'a>(
    &'a self,
    request: PageRequest<'a>,
    budget: &'a mut RateBudget,
  ) -> Result<Page, FetchError> {
    budget.acquire().await;
    let served = {
      let mut requests = self.requests.lock().unwrap();
      *requests += 1;
      *requests
    };
    if let Some((at, flag)) = &self.cancel_on {
      if *at == served {
        flag.cancel();
      }
    }
    if self.failing_topics.contains(request.topic) {
      return Err(FetchError::Status {
        topic:    request.topic.to_owned(),
        status:   503,
        attempts: 4,
      });
    }
    let key = (
      request.topic.to_owned(),
      request.page_token.unwrap_or_default().to_owned(),
    );
    Ok(self.pages.get(&key).cloned().unwrap_or_default())
  }
}

// ─── Citations ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedCitations {
  by_trial: HashMap<String, Vec<String>>,
  failing:  HashSet<String>,
  asked:    Mutex<Vec<String>>,
}

impl ScriptedCitations {
  pub fn with(mut self, nct_id: &str, pmids: &[&str]) -> Self {
    self
      .by_trial
      .insert(nct_id.to_owned(), pmids.iter().map(|p| (*p).to_owned()).collect());
    self
  }

  pub fn failing(mut self, nct_id: &str) -> Self {
    self.failing.insert(nct_id.to_owned());
    self
  }

  pub fn asked(&self) -> Vec<String> { self.asked.lock().unwrap().clone() }
}

impl CitationSource for ScriptedCitations {
  async fn citations_for<'a>(
    &'a self,
    nct_id: &'a str,
    budget: &'a mut RateBudget,
  ) -> Result<Vec<Citation>, CitationError> {
    budget.acquire().await;
    self.asked.lock().unwrap().push(nct_id.to_owned());
    if self.failing.contains(nct_id) {
      return Err(CitationError::Status { nct_id: nct_id.to_owned(), status: 500 });
    }
    Ok(
      self
        .by_trial
        .get(nct_id)
        .map(|pmids| pmids.iter().map(Citation::new).collect())
        .unwrap_or_default(),
    )
  }
}

// ─── Stores ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FlakyStoreError {
  #[error(transparent)]
  Store(#[from] readout_store_sqlite::Error),
  #[error("run log unavailable for topic {0}")]
  RunLog(String),
}

/// An in-memory store whose run log rejects the runs of chosen topics.
pub struct FlakyRunLog {
  inner:   SqliteStore,
  refuses: HashSet<String>,
}

impl FlakyRunLog {
  pub async fn refusing(topics: &[&str]) -> Self {
    Self {
      inner:   store().await,
      refuses: topics.iter().map(|t| (*t).to_owned()).collect(),
    }
  }
}

impl TrialStore for FlakyRunLog {
  type Error = FlakyStoreError;

  async fn upsert(&self, trial: &Trial) -> Result<UpsertOutcome, Self::Error> {
    Ok(self.inner.upsert(trial).await?)
  }

  async fn upsert_for_topic(
    &self,
    trial: &Trial,
    topic_id: &str,
  ) -> Result<UpsertOutcome, Self::Error> {
    Ok(self.inner.upsert_for_topic(trial, topic_id).await?)
  }

  async fn get_trial(&self, nct_id: &str) -> Result<Option<TrackedTrial>, Self::Error> {
    Ok(self.inner.get_trial(nct_id).await?)
  }

  async fn list_nct_ids(&self, limit: Option<usize>) -> Result<Vec<String>, Self::Error> {
    Ok(self.inner.list_nct_ids(limit).await?)
  }

  async fn associate_topic(&self, nct_id: &str, topic_id: &str) -> Result<bool, Self::Error> {
    Ok(self.inner.associate_topic(nct_id, topic_id).await?)
  }

  async fn prune_topic(
    &self,
    topic_id: &str,
    retain: &BTreeSet<String>,
  ) -> Result<usize, Self::Error> {
    Ok(self.inner.prune_topic(topic_id, retain).await?)
  }

  async fn find_by_readout_window(
    &self,
    start: NaiveDate,
    end: NaiveDate,
    statuses: &[TrialStatus],
  ) -> Result<Vec<TrackedTrial>, Self::Error> {
    Ok(self.inner.find_by_readout_window(start, end, statuses).await?)
  }

  async fn find_without_completion_date(
    &self,
    statuses: &[TrialStatus],
  ) -> Result<Vec<TrackedTrial>, Self::Error> {
    Ok(self.inner.find_without_completion_date(statuses).await?)
  }

  async fn find_by_topic(&self, topic_id: &str) -> Result<Vec<TrackedTrial>, Self::Error> {
    Ok(self.inner.find_by_topic(topic_id).await?)
  }

  async fn record_sync_run(&self, run: &SyncRun) -> Result<(), Self::Error> {
    if self.refuses.contains(&run.topic_id) {
      return Err(FlakyStoreError::RunLog(run.topic_id.clone()));
    }
    Ok(self.inner.record_sync_run(run).await?)
  }

  async fn list_sync_runs(
    &self,
    topic_id: Option<&str>,
    limit: usize,
  ) -> Result<Vec<SyncRun>, Self::Error> {
    Ok(self.inner.list_sync_runs(topic_id, limit).await?)
  }

  async fn attach_citations(
    &self,
    nct_id: &str,
    citations: &[Citation],
  ) -> Result<usize, Self::Error> {
    Ok(self.inner.attach_citations(nct_id, citations).await?)
  }
}
