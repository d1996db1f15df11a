//! Citation lookup against PubMed E-utilities.
//!
//! Registry identifiers appear in PubMed's secondary source field, either
//! bare or as `ClinicalTrials.gov/<id>`. A lookup is an `esearch` for the
//! matching PubMed ids followed by one `esummary` for their metadata.

use std::{future::Future, time::Duration};

use readout_core::{ConfigError, citation::Citation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CitationError, throttle::RateBudget};

// ─── Settings ────────────────────────────────────────────────────────────────

/// The `[citations]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CitationSettings {
  pub enabled:            bool,
  pub base_url:           String,
  /// Sent as the `tool` parameter and as the user agent.
  pub tool:               String,
  pub email:              Option<String>,
  pub throttle_ms:        u64,
  pub timeout_secs:       u64,
  pub max_trials_per_run: usize,
  /// Only look up trials that would appear in the digest window.
  pub actionable_only:    bool,
  pub retmax:             u32,
}

impl Default for CitationSettings {
  fn default() -> Self {
    Self {
      enabled:            false,
      base_url:           "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_owned(),
      tool:               "readout".to_owned(),
      email:              None,
      throttle_ms:        400,
      timeout_secs:       30,
      max_trials_per_run: 200,
      actionable_only:    true,
      retmax:             200,
    }
  }
}

impl CitationSettings {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.tool.trim().is_empty() {
      return Err(ConfigError::invalid("citations.tool", "a non-empty name", "\"\""));
    }
    if self.max_trials_per_run == 0 {
      return Err(ConfigError::invalid(
        "citations.max_trials_per_run",
        "at least 1",
        0,
      ));
    }
    if self.retmax == 0 {
      return Err(ConfigError::invalid("citations.retmax", "at least 1", 0));
    }
    if self.timeout_secs == 0 {
      return Err(ConfigError::invalid("citations.timeout_secs", "at least 1", 0));
    }
    Ok(())
  }

  pub fn rate_budget(&self) -> RateBudget {
    RateBudget::new(Duration::from_millis(self.throttle_ms))
  }
}

// ─── CitationSource ──────────────────────────────────────────────────────────

/// Anything that can list the publications citing a trial.
pub trait CitationSource: Send + Sync {
  fn citations_for<'a>(
    &'a self,
    nct_id: &'a str,
    budget: &'a mut RateBudget,
  ) -> impl Future<Output = Result<Vec<Citation>, CitationError>> + Send + 'a;
}

// ─── Response parsing ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
  esearchresult: SearchResult,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResult {
  idlist: Vec<String>,
}

/// The PubMed search term for one registry identifier.
pub fn search_term(nct_id: &str) -> String {
  format!(r#"("ClinicalTrials.gov/{nct_id}"[SI] OR "{nct_id}"[SI])"#)
}

fn string_field(item: &Value, key: &str) -> Option<String> {
  item
    .get(key)
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
}

fn doi(item: &Value) -> Option<String> {
  let from_ids = item
    .get("articleids")
    .and_then(Value::as_array)
    .into_iter()
    .flatten()
    .find(|id| id.get("idtype").and_then(Value::as_str) == Some("doi"))
    .and_then(|id| string_field(id, "value"));

  from_ids.or_else(|| {
    string_field(item, "elocationid")
      .filter(|e| e.to_ascii_lowercase().contains("doi"))
      .map(|e| e.replace("doi:", "").trim().to_owned())
  })
}

/// Build citations from an `esummary` body, in `pmids` order. Ids missing
/// from the summary are skipped.
pub fn parse_summary(pmids: &[String], summary: &Value) -> Vec<Citation> {
  let Some(result) = summary.get("result") else {
    return Vec::new();
  };

  pmids
    .iter()
    .filter_map(|pmid| {
      let item = result.get(pmid).filter(|v| v.is_object())?;
      Some(Citation {
        citation_id: pmid.clone(),
        title:       string_field(item, "title"),
        journal:     string_field(item, "fulljournalname")
          .or_else(|| string_field(item, "source")),
        published:   string_field(item, "pubdate"),
        doi:         doi(item),
      })
    })
    .collect()
}

// ─── PubMedClient ────────────────────────────────────────────────────────────

/// HTTP client for PubMed E-utilities.
#[derive(Clone)]
pub struct PubMedClient {
  client:   Client,
  settings: CitationSettings,
}

impl PubMedClient {
  pub fn new(settings: CitationSettings) -> Result<Self, CitationError> {
    let user_agent = match &settings.email {
      Some(email) => format!("{} (mailto:{email})", settings.tool),
      None => settings.tool.clone(),
    };
    let client = Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .user_agent(user_agent)
      .build()?;
    Ok(Self { client, settings })
  }

  async fn get(
    &self,
    endpoint: &str,
    nct_id: &str,
    mut params: Vec<(&str, String)>,
    budget: &mut RateBudget,
  ) -> Result<Value, CitationError> {
    params.push(("db", "pubmed".to_owned()));
    params.push(("retmode", "json".to_owned()));
    params.push(("tool", self.settings.tool.clone()));
    if let Some(email) = &self.settings.email {
      params.push(("email", email.clone()));
    }

    budget.acquire().await;
    let url = format!("{}/{endpoint}", self.settings.base_url.trim_end_matches('/'));
    let resp = self
      .client
      .get(url)
      .query(&params)
      .send()
      .await
      .map_err(|e| CitationError::Transport {
        nct_id:  nct_id.to_owned(),
        message: e.to_string(),
      })?;

    let status = resp.status();
    if !status.is_success() {
      return Err(CitationError::Status {
        nct_id: nct_id.to_owned(),
        status: status.as_u16(),
      });
    }

    resp.json().await.map_err(|e| CitationError::Decode {
      nct_id:  nct_id.to_owned(),
      message: e.to_string(),
    })
  }
}

impl CitationSource for PubMedClient {
  async fn citations_for<'a>(
    &'a self,
    nct_id: &'a str,
    budget: &'a mut RateBudget,
  ) -> Result<Vec<Citation>, CitationError> {
    let search = self
      .get(
        "esearch.fcgi",
        nct_id,
        vec![
          ("term", search_term(nct_id)),
          ("retmax", self.settings.retmax.to_string()),
        ],
        budget,
      )
      .await?;
    let pmids = serde_json::from_value::<SearchResponse>(search)
      .map_err(|e| CitationError::Decode {
        nct_id:  nct_id.to_owned(),
        message: e.to_string(),
      })?
      .esearchresult
      .idlist;

    if pmids.is_empty() {
      return Ok(Vec::new());
    }

    let summary = self
      .get("esummary.fcgi", nct_id, vec![("id", pmids.join(","))], budget)
      .await?;
    Ok(parse_summary(&pmids, &summary))
  }
}
