//! Trial: the canonical record tracked by the pipeline.
//!
//! A trial is built from one registry record by the normaliser. Every field
//! is strongly typed; untyped registry payloads never reach this module.
//! The whole struct serialises to the `raw_snapshot` retained for diffing and
//! audit, so field names here are part of the stored format.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::Result;

// ─── Dates ───────────────────────────────────────────────────────────────────

/// How much of a registry date was actually given.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
  Day,
  Month,
  Year,
}

/// Whether a registry value has happened or is still a projection.
///
/// Applies to dates (`ACTUAL` / `ESTIMATED` date types) and to enrollment
/// counts alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Certainty {
  Actual,
  Estimated,
}

impl Certainty {
  /// Parse the registry's `ACTUAL` / `ESTIMATED` labels, case-insensitively.
  pub fn from_registry(raw: &str) -> Option<Self> {
    match raw.trim().to_ascii_uppercase().as_str() {
      "ACTUAL" => Some(Self::Actual),
      "ESTIMATED" | "ANTICIPATED" => Some(Self::Estimated),
      _ => None,
    }
  }
}

/// A registry date that may only carry a year or a month.
///
/// Coarse dates are pinned to the first day of their period so they compare
/// with exact dates; `precision` keeps what was really known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialDate {
  /// The string exactly as the registry sent it (trimmed).
  pub raw:       String,
  pub date:      NaiveDate,
  pub precision: DatePrecision,
  pub certainty: Option<Certainty>,
}

impl PartialDate {
  /// Parse `YYYY`, `YYYY-MM`, or `YYYY-MM-DD`.
  ///
  /// Returns `None` for anything else, including impossible calendar dates.
  pub fn parse(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    let mut parts = raw.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;

    let (date, precision) = match (parts.next(), parts.next()) {
      (None, _) => (NaiveDate::from_ymd_opt(year, 1, 1)?, DatePrecision::Year),
      (Some(month), None) => (
        NaiveDate::from_ymd_opt(year, month.parse().ok()?, 1)?,
        DatePrecision::Month,
      ),
      (Some(month), Some(day)) => (
        NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)?,
        DatePrecision::Day,
      ),
    };

    Some(Self { raw: raw.to_owned(), date, precision, certainty: None })
  }

  pub fn with_certainty(mut self, certainty: Option<Certainty>) -> Self {
    self.certainty = certainty;
    self
  }

  /// True when the registry gave less than a full calendar day.
  pub fn is_approximate(&self) -> bool { self.precision != DatePrecision::Day }

  /// Signed number of days from `as_of` to this date (negative when past).
  pub fn days_from(&self, as_of: NaiveDate) -> i64 {
    (self.date - as_of).num_days()
  }
}

// ─── Categorical fields ──────────────────────────────────────────────────────

/// Trial phase. Declaration order is maturity order, so `max()` picks the
/// most advanced phase of a multi-phase trial.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Phase {
  #[default]
  #[serde(rename = "UNKNOWN")]
  #[strum(serialize = "UNKNOWN")]
  Unknown,
  #[serde(rename = "NA")]
  #[strum(serialize = "NA")]
  NotApplicable,
  #[serde(rename = "EARLY_PHASE1")]
  #[strum(serialize = "EARLY_PHASE1")]
  EarlyPhase1,
  #[serde(rename = "PHASE1")]
  #[strum(serialize = "PHASE1")]
  Phase1,
  #[serde(rename = "PHASE2")]
  #[strum(serialize = "PHASE2")]
  Phase2,
  #[serde(rename = "PHASE3")]
  #[strum(serialize = "PHASE3")]
  Phase3,
  #[serde(rename = "PHASE4")]
  #[strum(serialize = "PHASE4")]
  Phase4,
}

impl Phase {
  /// Collapse the registry's phase list to the most advanced phase.
  ///
  /// Combined labels such as `PHASE2/PHASE3` are split first; unrecognised
  /// labels are ignored.
  pub fn most_advanced<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
    labels
      .into_iter()
      .flat_map(|label| label.split(['/', ',', ' ']))
      .filter_map(|label| label.trim().parse::<Phase>().ok())
      .max()
      .unwrap_or_default()
  }

  /// Editor-facing label, e.g. `"Phase 3"`.
  pub fn label(&self) -> &'static str {
    match self {
      Self::Unknown => "Phase unknown",
      Self::NotApplicable => "Phase n/a",
      Self::EarlyPhase1 => "Early phase 1",
      Self::Phase1 => "Phase 1",
      Self::Phase2 => "Phase 2",
      Self::Phase3 => "Phase 3",
      Self::Phase4 => "Phase 4",
    }
  }
}

/// Category of the lead sponsor.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SponsorClass {
  Industry,
  Academic,
  Government,
  Other,
  #[default]
  Unknown,
}

impl SponsorClass {
  /// Map a registry agency class onto the four editorial categories.
  ///
  /// `NIH`, `FED`, and `OTHER_GOV` are government; `OTHER` and `NETWORK`
  /// (universities, hospitals, cooperative groups) are academic. The
  /// editorial names themselves are accepted verbatim.
  pub fn from_registry(raw: &str) -> Self {
    match raw.trim().to_ascii_uppercase().as_str() {
      "" => Self::Unknown,
      "INDUSTRY" => Self::Industry,
      "NIH" | "FED" | "OTHER_GOV" | "GOVERNMENT" => Self::Government,
      "OTHER" | "NETWORK" | "ACADEMIC" => Self::Academic,
      "UNKNOWN" => Self::Unknown,
      _ => Self::Other,
    }
  }
}

/// Overall recruitment status as reported by the registry.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TrialStatus {
  NotYetRecruiting,
  Recruiting,
  EnrollingByInvitation,
  ActiveNotRecruiting,
  Suspended,
  Terminated,
  Completed,
  Withdrawn,
  /// The registry's own `UNKNOWN` status (verification lapsed).
  Unknown,
  /// Anything the registry sends that is not listed above.
  Other,
}

impl TrialStatus {
  pub fn from_registry(raw: &str) -> Self {
    raw.trim().parse().unwrap_or(Self::Other)
  }

  /// Statuses that claim the trial is still running.
  pub fn is_open(&self) -> bool {
    matches!(
      self,
      Self::NotYetRecruiting
        | Self::Recruiting
        | Self::EnrollingByInvitation
        | Self::ActiveNotRecruiting
    )
  }
}

/// Editor-friendly bucket derived from intervention types.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
  #[strum(serialize = "drug/biologic")]
  DrugBiologic,
  #[strum(serialize = "device")]
  Device,
  #[strum(serialize = "procedure/surgery")]
  ProcedureSurgery,
  #[strum(serialize = "radiation")]
  Radiation,
  #[strum(serialize = "diagnostic")]
  Diagnostic,
  #[strum(serialize = "behavioral")]
  Behavioral,
  #[default]
  #[strum(serialize = "other")]
  Other,
}

impl Modality {
  /// Pick the first matching bucket, in priority order, for the registry's
  /// intervention types.
  pub fn infer<S: AsRef<str>>(intervention_types: &[S]) -> Self {
    let types: Vec<String> = intervention_types
      .iter()
      .map(|t| t.as_ref().trim().to_ascii_uppercase())
      .collect();
    let any = |wanted: &[&str]| types.iter().any(|t| wanted.contains(&t.as_str()));

    if any(&["DRUG", "BIOLOGICAL", "GENETIC", "GENE_TRANSFER", "CELL_THERAPY"]) {
      Self::DrugBiologic
    } else if any(&["DEVICE"]) {
      Self::Device
    } else if any(&["PROCEDURE", "SURGERY"]) {
      Self::ProcedureSurgery
    } else if any(&["RADIATION"]) {
      Self::Radiation
    } else if any(&["DIAGNOSTIC_TEST"]) {
      Self::Diagnostic
    } else if any(&["BEHAVIORAL"]) {
      Self::Behavioral
    } else {
      Self::Other
    }
  }
}

// ─── Compound fields ─────────────────────────────────────────────────────────

/// Participant count with its actual/estimated flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
  pub count:     u32,
  pub certainty: Option<Certainty>,
}

impl Enrollment {
  pub fn is_estimated(&self) -> bool {
    self.certainty == Some(Certainty::Estimated)
  }
}

/// Regulatory oversight flags; `None` means the registry did not say.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oversight {
  pub has_dmc:              Option<bool>,
  pub fda_regulated_drug:   Option<bool>,
  pub fda_regulated_device: Option<bool>,
}

impl Oversight {
  pub fn fda_regulated(&self) -> bool {
    self.fda_regulated_drug == Some(true)
      || self.fda_regulated_device == Some(true)
  }
}

/// Where a contact was listed on the registry record.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContactKind {
  /// A central contact for enrolment questions.
  Central,
  /// An overall official (principal investigator, study chair, ...).
  Official,
}

/// A person listed on the record. Every detail is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
  pub kind:        ContactKind,
  pub name:        Option<String>,
  pub role:        Option<String>,
  pub email:       Option<String>,
  pub phone:       Option<String>,
  pub affiliation: Option<String>,
}

// ─── Trial ───────────────────────────────────────────────────────────────────

/// The canonical, normalised form of one registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
  /// Registry identifier; primary key, never changes once stored.
  pub nct_id:                  String,
  pub title:                   String,
  pub official_title:          Option<String>,
  pub acronym:                 Option<String>,
  pub phase:                   Phase,
  pub status:                  TrialStatus,
  pub study_type:              Option<String>,
  pub sponsor_name:            Option<String>,
  pub sponsor_class:           SponsorClass,
  pub enrollment:              Option<Enrollment>,
  #[serde(default)]
  pub conditions:              Vec<String>,
  #[serde(default)]
  pub interventions:           Vec<String>,
  #[serde(default)]
  pub intervention_types:      Vec<String>,
  pub modality:                Modality,
  pub location_count:          Option<u32>,
  /// Central contacts first, then overall officials, in registry order.
  #[serde(default)]
  pub contacts:                Vec<Contact>,
  #[serde(default)]
  pub oversight:               Oversight,
  pub has_results:             bool,
  pub start_date:              Option<PartialDate>,
  pub primary_completion_date: Option<PartialDate>,
  pub completion_date:         Option<PartialDate>,
  pub last_update_posted:      Option<PartialDate>,
  pub results_first_posted:    Option<PartialDate>,
}

impl Trial {
  /// A trial with only an identifier and a title; every other field empty.
  pub fn new(nct_id: impl Into<String>, title: impl Into<String>) -> Self {
    Self {
      nct_id:                  nct_id.into(),
      title:                   title.into(),
      official_title:          None,
      acronym:                 None,
      phase:                   Phase::Unknown,
      status:                  TrialStatus::Unknown,
      study_type:              None,
      sponsor_name:            None,
      sponsor_class:           SponsorClass::Unknown,
      enrollment:              None,
      conditions:              Vec::new(),
      interventions:           Vec::new(),
      intervention_types:      Vec::new(),
      modality:                Modality::Other,
      location_count:          None,
      contacts:                Vec::new(),
      oversight:               Oversight::default(),
      has_results:             false,
      start_date:              None,
      primary_completion_date: None,
      completion_date:         None,
      last_update_posted:      None,
      results_first_posted:    None,
    }
  }

  /// The full normalised record as a JSON object; this is what the store
  /// keeps as `raw_snapshot` and diffs field by field.
  pub fn snapshot(&self) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(self)?)
  }

  /// Rebuild a trial from a stored snapshot.
  pub fn from_snapshot(snapshot: serde_json::Value) -> Result<Self> {
    Ok(serde_json::from_value(snapshot)?)
  }

  /// The first central contact that lists an email address.
  pub fn contact_email(&self) -> Option<&str> {
    self
      .contacts
      .iter()
      .filter(|c| c.kind == ContactKind::Central)
      .find_map(|c| c.email.as_deref())
  }

  /// Title, official title, acronym, conditions, and interventions joined
  /// with spaces; the text keyword matching runs over.
  pub fn searchable_text(&self) -> String {
    let mut parts: Vec<&str> = vec![self.title.as_str()];
    parts.extend(self.official_title.as_deref());
    parts.extend(self.acronym.as_deref());
    parts.extend(self.conditions.iter().map(String::as_str));
    parts.extend(self.interventions.iter().map(String::as_str));
    parts.join(" ")
  }
}
