//! Digest renderers: markdown grouped by topic, CSV, and JSON.

use std::collections::BTreeMap;

use anyhow::Context as _;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use readout_core::topic::TopicConfig;
use readout_pipeline::DigestEntry;
use serde::Serialize;

/// Entries listed under one topic heading.
const PER_TOPIC: usize = 25;

const UNTAGGED: &str = "(untagged)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
  Markdown,
  Csv,
  Json,
}

impl Format {
  pub fn extension(self) -> &'static str {
    match self {
      Self::Markdown => "md",
      Self::Csv => "csv",
      Self::Json => "json",
    }
  }
}

pub fn trial_url(nct_id: &str) -> String { format!("https://clinicaltrials.gov/study/{nct_id}") }

pub fn render(
  entries: &[DigestEntry],
  format: Format,
  topics: &[TopicConfig],
  generated_at: DateTime<Utc>,
) -> anyhow::Result<String> {
  match format {
    Format::Markdown => Ok(markdown(entries, topics, generated_at)),
    Format::Csv => csv(entries),
    Format::Json => serde_json::to_string_pretty(entries).context("failed to encode digest"),
  }
}

// ─── Markdown ────────────────────────────────────────────────────────────────

/// Headline reasons: the top two urgency and top two major-trial reasons.
fn why_flagged(entry: &DigestEntry) -> Vec<&str> {
  let s = &entry.scores;
  s.urgency
    .reasons
    .iter()
    .take(2)
    .chain(s.major.reasons.iter().take(2))
    .map(|r| r.text.as_str())
    .collect()
}

fn markdown(entries: &[DigestEntry], topics: &[TopicConfig], generated_at: DateTime<Utc>) -> String {
  // Entries arrive ranked; grouping keeps that order within each topic.
  let mut by_topic: BTreeMap<&str, Vec<&DigestEntry>> = BTreeMap::new();
  for entry in entries {
    if entry.tracked.topics.is_empty() {
      by_topic.entry(UNTAGGED).or_default().push(entry);
    }
    for topic in &entry.tracked.topics {
      by_topic.entry(topic.as_str()).or_default().push(entry);
    }
  }
  let untagged = by_topic.remove(UNTAGGED);

  let mut out = String::new();
  out.push_str("# Readout digest\n\n");
  out.push_str(&format!(
    "_Generated: {}_\n\n",
    generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
  ));
  out.push_str(&format!("Total trials: **{}**\n", entries.len()));

  let groups = by_topic.into_iter().chain(untagged.map(|e| (UNTAGGED, e)));
  for (topic_id, group) in groups {
    let topic = topics.iter().find(|t| t.id == topic_id);
    out.push_str(&format!("\n## {topic_id}\n"));
    for entry in group.into_iter().take(PER_TOPIC) {
      out.push('\n');
      out.push_str(&markdown_entry(entry, topic));
    }
  }
  out
}

fn markdown_entry(entry: &DigestEntry, topic: Option<&TopicConfig>) -> String {
  let t = &entry.tracked.trial;
  let s = &entry.scores;
  let completion = t
    .primary_completion_date
    .as_ref()
    .map_or("unknown", |d| d.raw.as_str());
  let days = entry
    .days_to_readout
    .map_or_else(|| "n/a".to_owned(), |d| d.to_string());
  let citations = entry
    .tracked
    .known_citation_count()
    .map_or_else(|| "not checked".to_owned(), |n| n.to_string());

  let mut lines = vec![
    format!("### {}: {}", t.nct_id, t.title),
    String::new(),
    format!(
      "- **Urgency:** {} | **Major:** {} | **Interest:** {} | **Composite:** {}",
      s.urgency.value, s.major.value, s.interest.value, s.composite
    ),
    format!("- **Phase:** {} | **Modality:** {}", t.phase.label(), t.modality),
    format!(
      "- **Sponsor:** {} ({})",
      t.sponsor_name.as_deref().unwrap_or("unknown"),
      t.sponsor_class
    ),
    format!("- **Status:** {}", t.status),
    format!("- **Primary completion:** {completion} | **Days to readout:** {days}"),
    format!(
      "- **Results posted:** {} | **Citations:** {citations}",
      if t.has_results { "yes" } else { "no" }
    ),
  ];
  if let Some(email) = t.contact_email() {
    lines.push(format!("- **Central contact email:** {email}"));
  }
  if let Some(topic) = topic {
    let tags = topic.matching_tags(&t.searchable_text());
    if !tags.is_empty() {
      lines.push(format!("- **Tags:** {}", tags.join(", ")));
    }
  }
  let why = why_flagged(entry);
  if !why.is_empty() {
    lines.push(format!("- **Why flagged:** {}", why.join("; ")));
  }
  if !s.interest.reasons.is_empty() {
    let interest: Vec<&str> = s.interest.reason_texts();
    lines.push(format!("- **Interest:** {}", interest.join("; ")));
  }
  lines.push(format!("- **Link:** {}", trial_url(&t.nct_id)));

  let mut block = lines.join("\n");
  block.push('\n');
  block
}

// ─── CSV ─────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CsvRow<'a> {
  rank:               usize,
  nct_id:             &'a str,
  title:              &'a str,
  phase:              &'a str,
  status:             String,
  modality:           String,
  sponsor:            &'a str,
  sponsor_class:      String,
  enrollment:         Option<u32>,
  primary_completion: Option<&'a str>,
  days_to_readout:    Option<i64>,
  has_results:        bool,
  citations:          Option<usize>,
  contact_email:      Option<&'a str>,
  urgency:            f64,
  major:              f64,
  interest:           f64,
  composite:          f64,
  topics:             String,
  conditions:         String,
  interventions:      String,
  reasons:            String,
  url:                String,
}

fn csv(entries: &[DigestEntry]) -> anyhow::Result<String> {
  let mut writer = csv::Writer::from_writer(Vec::new());
  for (i, entry) in entries.iter().enumerate() {
    let t = &entry.tracked.trial;
    let s = &entry.scores;
    let reasons: Vec<&str> = s
      .urgency
      .reason_texts()
      .into_iter()
      .chain(s.major.reason_texts())
      .chain(s.interest.reason_texts())
      .collect();
    writer
      .serialize(CsvRow {
        rank:               i + 1,
        nct_id:             &t.nct_id,
        title:              &t.title,
        phase:              t.phase.as_ref(),
        status:             t.status.to_string(),
        modality:           t.modality.to_string(),
        sponsor:            t.sponsor_name.as_deref().unwrap_or(""),
        sponsor_class:      t.sponsor_class.to_string(),
        enrollment:         t.enrollment.map(|e| e.count),
        primary_completion: t.primary_completion_date.as_ref().map(|d| d.raw.as_str()),
        days_to_readout:    entry.days_to_readout,
        has_results:        t.has_results,
        citations:          entry.tracked.known_citation_count(),
        contact_email:      t.contact_email(),
        urgency:            s.urgency.value,
        major:              s.major.value,
        interest:           s.interest.value,
        composite:          s.composite,
        topics:             entry
          .tracked
          .topics
          .iter()
          .map(String::as_str)
          .collect::<Vec<_>>()
          .join("; "),
        conditions:         t.conditions.join("; "),
        interventions:      t.interventions.join("; "),
        reasons:            reasons.join("; "),
        url:                trial_url(&t.nct_id),
      })
      .context("failed to write CSV row")?;
  }
  let bytes = writer.into_inner().context("failed to flush CSV")?;
  String::from_utf8(bytes).context("CSV output is not UTF-8")
}
