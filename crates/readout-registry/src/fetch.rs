//! Fetcher: paginated, throttled, retrying reads of the registry search
//! endpoint.
//!
//! [`PageSource`] is the seam: [`RegistryClient`] implements it over HTTP,
//! tests implement it with scripted pages. [`StudyCursor`] turns any source
//! into a lazy sequence of whole study records.

use std::{
  collections::{HashSet, VecDeque},
  future::Future,
  time::Duration,
};

use readout_core::{ConfigError, topic::TopicConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  FetchError,
  retry::{AttemptError, RetryPolicy, with_retry},
  throttle::RateBudget,
};

const NEXT_PAGE_HEADER: &str = "x-next-page-token";

// ─── Settings ────────────────────────────────────────────────────────────────

/// The `[registry]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
  pub base_url:           String,
  pub page_size:          u32,
  /// Stop a topic after this many pages; `None` follows every page.
  pub max_pages:          Option<u32>,
  /// Minimum spacing between requests of one topic.
  pub throttle_ms:        u64,
  pub max_attempts:       u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms:     u64,
  pub timeout_secs:       u64,
  pub user_agent:         String,
}

impl Default for FetchSettings {
  fn default() -> Self {
    Self {
      base_url:           "https://clinicaltrials.gov/api/v2".to_owned(),
      page_size:          200,
      max_pages:          None,
      throttle_ms:        250,
      max_attempts:       4,
      initial_backoff_ms: 500,
      max_backoff_ms:     8_000,
      timeout_secs:       30,
      user_agent:         concat!("readout/", env!("CARGO_PKG_VERSION")).to_owned(),
    }
  }
}

impl FetchSettings {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.base_url.trim().is_empty() {
      return Err(ConfigError::invalid("registry.base_url", "a URL", "\"\""));
    }
    if !(1..=1000).contains(&self.page_size) {
      return Err(ConfigError::invalid(
        "registry.page_size",
        "between 1 and 1000",
        self.page_size,
      ));
    }
    if self.max_pages == Some(0) {
      return Err(ConfigError::invalid("registry.max_pages", "at least 1", 0));
    }
    if self.max_attempts == 0 {
      return Err(ConfigError::invalid("registry.max_attempts", "at least 1", 0));
    }
    if self.initial_backoff_ms > self.max_backoff_ms {
      return Err(ConfigError::invalid(
        "registry.initial_backoff_ms",
        "no larger than max_backoff_ms",
        self.initial_backoff_ms,
      ));
    }
    if self.timeout_secs == 0 {
      return Err(ConfigError::invalid("registry.timeout_secs", "at least 1", 0));
    }
    Ok(())
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts:    self.max_attempts,
      initial_backoff: Duration::from_millis(self.initial_backoff_ms),
      max_backoff:     Duration::from_millis(self.max_backoff_ms),
    }
  }

  /// A fresh budget for one topic's fetch.
  pub fn rate_budget(&self) -> RateBudget {
    RateBudget::new(Duration::from_millis(self.throttle_ms))
  }
}

// ─── PageSource ──────────────────────────────────────────────────────────────

/// One page request for one topic.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
  pub topic:      &'a str,
  pub params:     &'a [(String, String)],
  /// `None` asks for the first page.
  pub page_token: Option<&'a str>,
  pub page_size:  u32,
}

/// One page of raw study records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
  pub studies:         Vec<Value>,
  pub next_page_token: Option<String>,
}

/// Anything that can serve registry pages.
///
/// Implementations apply their own retry policy and must wait on `budget`
/// before every request they send.
pub trait PageSource: Send + Sync {
  fn fetch_page<'a>(
    &'a self,
    request: PageRequest<'a>,
    budget: &'a mut RateBudget,
  ) -> impl Future<Output = Result<Page, FetchError>> + Send + 'a;
}

// ─── RegistryClient ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPage {
  #[serde(default)]
  studies:         Vec<Value>,
  #[serde(default)]
  next_page_token: Option<String>,
}

/// HTTP client for the registry's `GET /studies` endpoint.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct RegistryClient {
  client:   Client,
  settings: FetchSettings,
}

impl RegistryClient {
  pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .user_agent(settings.user_agent.clone())
      .build()?;
    Ok(Self { client, settings })
  }

  pub fn settings(&self) -> &FetchSettings { &self.settings }

  fn studies_url(&self) -> String {
    format!("{}/studies", self.settings.base_url.trim_end_matches('/'))
  }

  /// `GET /studies?<topic params>&format=json&pageSize=<n>[&pageToken=<t>]`
  async fn request_page(&self, request: &PageRequest<'_>) -> Result<Page, AttemptError> {
    let mut query: Vec<(&str, String)> = request
      .params
      .iter()
      .filter(|(k, _)| k != "pageToken")
      .map(|(k, v)| (k.as_str(), v.clone()))
      .collect();
    if !request.params.iter().any(|(k, _)| k == "format") {
      query.push(("format", "json".to_owned()));
    }
    if !request.params.iter().any(|(k, _)| k == "pageSize") {
      query.push(("pageSize", request.page_size.to_string()));
    }
    if let Some(token) = request.page_token {
      query.push(("pageToken", token.to_owned()));
    }

    let resp = self
      .client
      .get(self.studies_url())
      .query(&query)
      .send()
      .await
      .map_err(|e| AttemptError::Transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
      return Err(AttemptError::Status(status.as_u16()));
    }

    let header_token = resp
      .headers()
      .get(NEXT_PAGE_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::to_owned);

    let body: RawPage = resp.json().await.map_err(|e| {
      if e.is_decode() {
        AttemptError::Decode(e.to_string())
      } else {
        AttemptError::Transport(e.to_string())
      }
    })?;

    Ok(Page {
      studies:         body.studies,
      next_page_token: body
        .next_page_token
        .filter(|t| !t.is_empty())
        .or(header_token),
    })
  }
}

impl PageSource for RegistryClient {
  async fn fetch_page<'a>(
    &'a self,
    request: PageRequest<'a>,
    budget: &'a mut RateBudget,
  ) -> Result<Page, FetchError> {
    let policy = self.settings.retry_policy();
    with_retry(&policy, budget, request.topic, || self.request_page(&request)).await
  }
}

// ─── StudyCursor ─────────────────────────────────────────────────────────────

/// Lazy, restartable sequence of one topic's study records.
///
/// Pages are fetched on demand and yielded record by record. The cursor owns
/// the topic's [`RateBudget`], so at most one request is in flight and
/// consecutive requests are spaced by the throttle. After an error, the last
/// page, or a page token the registry already sent, [`next`](Self::next)
/// returns `None`.
pub struct StudyCursor<'a, S> {
  source:        &'a S,
  topic:         &'a str,
  params:        Vec<(String, String)>,
  page_size:     u32,
  max_pages:     Option<u32>,
  budget:        RateBudget,
  buffer:        VecDeque<Value>,
  current_token: Option<String>,
  next_token:    Option<String>,
  seen_tokens:   HashSet<String>,
  pages_fetched: u32,
  exhausted:     bool,
}

impl<'a, S: PageSource> StudyCursor<'a, S> {
  pub fn new(source: &'a S, topic: &'a TopicConfig, settings: &FetchSettings) -> Self {
    Self {
      source,
      topic: &topic.id,
      params: topic.query_params(),
      page_size: settings.page_size,
      max_pages: settings.max_pages,
      budget: settings.rate_budget(),
      buffer: VecDeque::new(),
      current_token: None,
      next_token: None,
      seen_tokens: HashSet::new(),
      pages_fetched: 0,
      exhausted: false,
    }
  }

  /// Start from a page token previously returned by
  /// [`checkpoint`](Self::checkpoint) instead of the first page.
  pub fn resume_from(mut self, page_token: impl Into<String>) -> Self {
    let token = page_token.into();
    self.seen_tokens.insert(token.clone());
    self.next_token = Some(token);
    self
  }

  /// Token of the page currently being consumed; `None` while on the first
  /// page. Resuming from it replays at most one page.
  pub fn checkpoint(&self) -> Option<&str> { self.current_token.as_deref() }

  pub fn pages_fetched(&self) -> u32 { self.pages_fetched }

  /// The next complete study record.
  pub async fn next(&mut self) -> Option<Result<Value, FetchError>> {
    loop {
      if let Some(study) = self.buffer.pop_front() {
        return Some(Ok(study));
      }
      if self.exhausted {
        return None;
      }
      if self.max_pages.is_some_and(|max| self.pages_fetched >= max) {
        tracing::debug!(topic = %self.topic, pages = self.pages_fetched, "page limit reached");
        self.exhausted = true;
        return None;
      }

      let request = PageRequest {
        topic:      self.topic,
        params:     &self.params,
        page_token: self.next_token.as_deref(),
        page_size:  self.page_size,
      };

      match self.source.fetch_page(request, &mut self.budget).await {
        Ok(page) => {
          self.pages_fetched += 1;
          self.current_token = self.next_token.take();
          self.next_token = page.next_page_token.filter(|t| !t.is_empty());
          if let Some(token) = &self.next_token
            && !self.seen_tokens.insert(token.clone())
          {
            tracing::warn!(
              topic = %self.topic,
              page = self.pages_fetched,
              token = %token,
              "registry repeated a page token; stopping pagination"
            );
            self.next_token = None;
          }
          self.exhausted = self.next_token.is_none();
          tracing::debug!(
            topic = %self.topic,
            page = self.pages_fetched,
            records = page.studies.len(),
            "fetched page"
          );
          self.buffer.extend(page.studies);
        }
        Err(err) => {
          self.exhausted = true;
          return Some(Err(err));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::HashMap, sync::Mutex};

  use serde_json::json;

  use super::*;

  /// Pages keyed by the token that requests them (`""` for the first page).
  #[derive(Default)]
  struct ScriptedSource {
    pages:    HashMap<String, Page>,
    fail_on:  Option<String>,
    requests: Mutex<Vec<Option<String>>>,
  }

  impl ScriptedSource {
    fn page(mut self, token: &str, ids: &[&str], next: Option<&str>) -> Self {
      self.pages.insert(token.to_owned(), Page {
        studies:         ids.iter().map(|id| json!({ "id": id })).collect(),
        next_page_token: next.map(str::to_owned),
      });
      self
    }

    fn requested(&self) -> Vec<Option<String>> {
      self.requests.lock().unwrap().clone()
    }
  }

  impl PageSource for ScriptedSource {
    async fn fetch_page<'a>(
      &'a self,
      request: PageRequest<'a>,
      budget: &'a mut RateBudget,
    ) -> Result<Page, FetchError> {
      budget.acquire().await;
      let token = request.page_token.map(str::to_owned);
      self.requests.lock().unwrap().push(token.clone());
      let key = token.unwrap_or_default();
      if self.fail_on.as_deref() == Some(key.as_str()) {
        return Err(FetchError::Status {
          topic:    request.topic.to_owned(),
          status:   503,
          attempts: 4,
        });
      }
      Ok(self.pages.get(&key).cloned().unwrap_or_default())
    }
  }

  fn topic() -> TopicConfig {
    let mut t = TopicConfig::new("oncology");
    t.query.insert("query.cond".into(), "oncology".into());
    t
  }

  fn settings() -> FetchSettings {
    FetchSettings { throttle_ms: 0, ..FetchSettings::default() }
  }

  async fn drain<S: PageSource>(cursor: &mut StudyCursor<'_, S>) -> Vec<String> {
    let mut ids = Vec::new();
    while let Some(Ok(study)) = cursor.next().await {
      ids.push(study["id"].as_str().unwrap().to_owned());
    }
    ids
  }

  fn three_pages() -> ScriptedSource {
    ScriptedSource::default()
      .page("", &["A", "B"], Some("p2"))
      .page("p2", &["C"], Some("p3"))
      .page("p3", &["D", "E"], None)
  }

  #[tokio::test]
  async fn follows_pagination_to_the_end() {
    let source = three_pages();
    let topic = topic();
    let mut cursor = StudyCursor::new(&source, &topic, &settings());

    assert_eq!(drain(&mut cursor).await, vec!["A", "B", "C", "D", "E"]);
    assert_eq!(cursor.pages_fetched(), 3);
    assert_eq!(source.requested(), vec![
      None,
      Some("p2".into()),
      Some("p3".into())
    ]);
    assert!(cursor.next().await.is_none());
  }

  #[tokio::test]
  async fn max_pages_stops_early() {
    let source = three_pages();
    let topic = topic();
    let settings = FetchSettings { max_pages: Some(2), ..settings() };
    let mut cursor = StudyCursor::new(&source, &topic, &settings);

    assert_eq!(drain(&mut cursor).await, vec!["A", "B", "C"]);
    assert_eq!(source.requested().len(), 2);
  }

  #[tokio::test]
  async fn resumes_from_checkpoint() {
    let source = three_pages();
    let topic = topic();

    let mut first = StudyCursor::new(&source, &topic, &settings());
    first.next().await.unwrap().unwrap();
    first.next().await.unwrap().unwrap();
    first.next().await.unwrap().unwrap(); // "C", from page p2
    let checkpoint = first.checkpoint().map(str::to_owned).unwrap();
    assert_eq!(checkpoint, "p2");

    let mut resumed =
      StudyCursor::new(&source, &topic, &settings()).resume_from(checkpoint);
    assert_eq!(drain(&mut resumed).await, vec!["C", "D", "E"]);
  }

  #[tokio::test]
  async fn error_is_surfaced_once_then_ends() {
    let source = ScriptedSource { fail_on: Some("p2".into()), ..three_pages() };
    let topic = topic();
    let mut cursor = StudyCursor::new(&source, &topic, &settings());

    assert!(cursor.next().await.unwrap().is_ok());
    assert!(cursor.next().await.unwrap().is_ok());
    let err = cursor.next().await.unwrap().unwrap_err();
    assert_eq!(err.last_status(), Some(503));
    assert!(cursor.next().await.is_none());
  }

  #[tokio::test]
  async fn repeated_page_token_ends_pagination() {
    let source = ScriptedSource::default()
      .page("", &["A"], Some("p2"))
      .page("p2", &["B"], Some("p2"));
    let topic = topic();
    let mut cursor = StudyCursor::new(&source, &topic, &settings());

    assert_eq!(drain(&mut cursor).await, vec!["A", "B"]);
    assert_eq!(cursor.pages_fetched(), 2);
    assert!(cursor.next().await.is_none());

    let cycling = ScriptedSource::default()
      .page("", &["A"], Some("p2"))
      .page("p2", &["B"], Some("p3"))
      .page("p3", &["C"], Some("p2"));
    let mut cursor = StudyCursor::new(&cycling, &topic, &settings());
    assert_eq!(drain(&mut cursor).await, vec!["A", "B", "C"]);
    assert_eq!(cycling.requested().len(), 3);
  }

  #[test]
  fn settings_validation() {
    assert_eq!(FetchSettings::default().validate(), Ok(()));
    let zero = FetchSettings { page_size: 0, ..FetchSettings::default() };
    assert!(zero.validate().is_err());
    let no_pages = FetchSettings { max_pages: Some(0), ..FetchSettings::default() };
    assert!(no_pages.validate().is_err());
    let backwards = FetchSettings {
      initial_backoff_ms: 10_000,
      ..FetchSettings::default()
    };
    assert!(backwards.validate().is_err());
  }

  #[test]
  fn settings_reject_unknown_keys() {
    let parsed: Result<FetchSettings, _> =
      serde_json::from_str(r#"{"page_size": 50, "pagesize": 10}"#);
    assert!(parsed.is_err());
    let ok: FetchSettings = serde_json::from_str(r#"{"page_size": 50}"#).unwrap();
    assert_eq!(ok.page_size, 50);
    assert_eq!(ok.throttle_ms, 250);
  }
}
