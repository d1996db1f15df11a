//! Normalizer: one raw registry study → one [`Trial`].
//!
//! The registry payload is untyped JSON. It is read here through lenient
//! serde views where a field of the wrong shape reads as absent. Only a
//! missing identifier rejects the record.

use readout_core::{
  Trial,
  trial::{
    Certainty, Contact, ContactKind, Enrollment, Modality, Oversight, PartialDate,
    Phase, SponsorClass, TrialStatus,
  },
};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

use crate::NormalizationError;

// ─── Raw views ───────────────────────────────────────────────────────────────

/// Deserialize `T`, falling back to its default when the value has the wrong
/// shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned + Default,
{
  let value = Value::deserialize(deserializer)?;
  Ok(serde_json::from_value(value).unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawStudy {
  #[serde(deserialize_with = "lenient")]
  protocol_section: ProtocolSection,
  #[serde(deserialize_with = "lenient")]
  has_results:      Option<bool>,
  #[serde(deserialize_with = "lenient")]
  id:               Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProtocolSection {
  #[serde(deserialize_with = "lenient")]
  identification_module:       IdentificationModule,
  #[serde(deserialize_with = "lenient")]
  status_module:               StatusModule,
  #[serde(deserialize_with = "lenient")]
  sponsor_collaborators_module: SponsorModule,
  #[serde(deserialize_with = "lenient")]
  oversight_module:            OversightModule,
  #[serde(deserialize_with = "lenient")]
  design_module:               DesignModule,
  #[serde(deserialize_with = "lenient")]
  conditions_module:           ConditionsModule,
  #[serde(deserialize_with = "lenient")]
  arms_interventions_module:   InterventionsModule,
  #[serde(deserialize_with = "lenient")]
  contacts_locations_module:   ContactsLocationsModule,
  #[serde(deserialize_with = "lenient")]
  locations_module:            LocationsModule,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IdentificationModule {
  #[serde(deserialize_with = "lenient")]
  nct_id:         Option<String>,
  #[serde(deserialize_with = "lenient")]
  brief_title:    Option<String>,
  #[serde(deserialize_with = "lenient")]
  official_title: Option<String>,
  #[serde(deserialize_with = "lenient")]
  acronym:        Option<String>,
  #[serde(deserialize_with = "lenient")]
  organization:   Organization,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Organization {
  #[serde(deserialize_with = "lenient")]
  full_name: Option<String>,
  #[serde(deserialize_with = "lenient")]
  class:     Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatusModule {
  #[serde(deserialize_with = "lenient")]
  overall_status:                 Option<String>,
  start_date_struct:              Option<Value>,
  primary_completion_date_struct: Option<Value>,
  completion_date_struct:         Option<Value>,
  last_update_post_date_struct:   Option<Value>,
  results_first_post_date_struct: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SponsorModule {
  #[serde(deserialize_with = "lenient")]
  lead_sponsor: LeadSponsor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LeadSponsor {
  #[serde(deserialize_with = "lenient")]
  name:  Option<String>,
  #[serde(deserialize_with = "lenient")]
  class: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OversightModule {
  #[serde(deserialize_with = "lenient")]
  oversight_has_dmc:       Option<bool>,
  #[serde(deserialize_with = "lenient")]
  is_fda_regulated_drug:   Option<bool>,
  #[serde(deserialize_with = "lenient")]
  is_fda_regulated_device: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DesignModule {
  #[serde(deserialize_with = "lenient")]
  study_type:      Option<String>,
  phases:          Option<Value>,
  #[serde(deserialize_with = "lenient")]
  enrollment_info: EnrollmentInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnrollmentInfo {
  #[serde(deserialize_with = "lenient")]
  count:  Option<u32>,
  #[serde(rename = "type", deserialize_with = "lenient")]
  kind:   Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConditionsModule {
  #[serde(deserialize_with = "lenient")]
  conditions: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InterventionsModule {
  #[serde(deserialize_with = "lenient")]
  interventions: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LocationsModule {
  #[serde(deserialize_with = "lenient")]
  locations: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContactsLocationsModule {
  #[serde(deserialize_with = "lenient")]
  locations:         Option<Vec<Value>>,
  #[serde(deserialize_with = "lenient")]
  central_contacts:  Vec<Value>,
  #[serde(deserialize_with = "lenient")]
  overall_officials: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawContact {
  #[serde(deserialize_with = "lenient")]
  name:        Option<String>,
  #[serde(deserialize_with = "lenient")]
  role:        Option<String>,
  #[serde(deserialize_with = "lenient")]
  email:       Option<String>,
  #[serde(deserialize_with = "lenient")]
  phone:       Option<String>,
  #[serde(deserialize_with = "lenient")]
  affiliation: Option<String>,
}

// ─── Field helpers ───────────────────────────────────────────────────────────

/// Trimmed, non-empty text.
fn text(raw: Option<String>) -> Option<String> {
  raw
    .map(|s| s.trim().to_owned())
    .filter(|s| !s.is_empty())
}

/// Strings from a list, trimmed, empties dropped, first occurrence kept.
fn dedup_strings<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for item in items.map(str::trim).filter(|s| !s.is_empty()) {
    if !out.iter().any(|seen| seen == item) {
      out.push(item.to_owned());
    }
  }
  out
}

/// A registry date, either `{ "date": .., "type": .. }` or a bare string.
/// Unparseable dates read as absent.
fn registry_date(raw: Option<&Value>) -> Option<PartialDate> {
  let (date, kind) = match raw? {
    Value::String(s) => (s.as_str(), None),
    Value::Object(fields) => (
      fields.get("date")?.as_str()?,
      fields.get("type").and_then(Value::as_str),
    ),
    _ => return None,
  };
  PartialDate::parse(date)
    .map(|d| d.with_certainty(kind.and_then(Certainty::from_registry)))
}

/// Contacts of one kind; entries that are not objects, or that carry no
/// detail at all, are skipped.
fn parse_contacts(entries: &[Value], kind: ContactKind) -> impl Iterator<Item = Contact> + '_ {
  entries
    .iter()
    .filter(|entry| entry.is_object())
    .filter_map(|entry| RawContact::deserialize(entry).ok())
    .map(move |raw| Contact {
      kind,
      name: text(raw.name),
      role: text(raw.role),
      email: text(raw.email),
      phone: text(raw.phone),
      affiliation: text(raw.affiliation),
    })
    .filter(|c| {
      c.name.is_some()
        || c.role.is_some()
        || c.email.is_some()
        || c.phone.is_some()
        || c.affiliation.is_some()
    })
}

fn phase(raw: Option<&Value>) -> Phase {
  match raw {
    Some(Value::Array(items)) => {
      Phase::most_advanced(items.iter().filter_map(Value::as_str))
    }
    Some(Value::String(s)) => Phase::most_advanced([s.as_str()]),
    _ => Phase::Unknown,
  }
}

// ─── normalize ───────────────────────────────────────────────────────────────

/// Map one registry study onto the canonical [`Trial`].
///
/// Missing optional fields become `None` or empty. The identifier comes from
/// `protocolSection.identificationModule.nctId`, falling back to a top-level
/// `id`; a study with neither is rejected.
pub fn normalize(study: &Value) -> Result<Trial, NormalizationError> {
  if !study.is_object() {
    return Err(NormalizationError::NotAnObject);
  }
  let raw: RawStudy =
    RawStudy::deserialize(study).map_err(|_| NormalizationError::NotAnObject)?;
  let p = raw.protocol_section;
  let ident = p.identification_module;

  let nct_id = text(ident.nct_id)
    .or_else(|| text(raw.id))
    .ok_or(NormalizationError::MissingIdentifier)?;

  let official_title = text(ident.official_title);
  let title = text(ident.brief_title)
    .or_else(|| official_title.clone())
    .unwrap_or_else(|| nct_id.clone());

  let status = &p.status_module;
  let sponsor = p.sponsor_collaborators_module.lead_sponsor;
  let sponsor_name =
    text(sponsor.name).or_else(|| text(ident.organization.full_name));
  let sponsor_class = text(sponsor.class)
    .or_else(|| text(ident.organization.class))
    .map_or(SponsorClass::Unknown, |c| SponsorClass::from_registry(&c));

  let design = p.design_module;
  let enrollment = design.enrollment_info.count.map(|count| Enrollment {
    count,
    certainty: design
      .enrollment_info
      .kind
      .as_deref()
      .and_then(Certainty::from_registry),
  });

  let interventions = &p.arms_interventions_module.interventions;
  let intervention_field = |field: &'static str| {
    dedup_strings(
      interventions
        .iter()
        .filter_map(move |i| i.get(field).and_then(Value::as_str)),
    )
  };
  let intervention_names = intervention_field("name");
  let intervention_types = intervention_field("type");

  let people = &p.contacts_locations_module;
  let contacts: Vec<Contact> = parse_contacts(&people.central_contacts, ContactKind::Central)
    .chain(parse_contacts(&people.overall_officials, ContactKind::Official))
    .collect();

  let location_count = p
    .contacts_locations_module
    .locations
    .or(p.locations_module.locations)
    .map(|locs| u32::try_from(locs.len()).unwrap_or(u32::MAX));

  let results_first_posted =
    registry_date(status.results_first_post_date_struct.as_ref());
  let has_results = raw
    .has_results
    .unwrap_or(results_first_posted.is_some());

  Ok(Trial {
    nct_id,
    title,
    official_title,
    acronym: text(ident.acronym),
    phase: phase(design.phases.as_ref()),
    status: status
      .overall_status
      .as_deref()
      .map_or(TrialStatus::Unknown, TrialStatus::from_registry),
    study_type: text(design.study_type),
    sponsor_name,
    sponsor_class,
    enrollment,
    conditions: dedup_strings(
      p.conditions_module
        .conditions
        .iter()
        .filter_map(Value::as_str),
    ),
    modality: Modality::infer(intervention_types.as_slice()),
    interventions: intervention_names,
    intervention_types,
    location_count,
    contacts,
    oversight: Oversight {
      has_dmc:              p.oversight_module.oversight_has_dmc,
      fda_regulated_drug:   p.oversight_module.is_fda_regulated_drug,
      fda_regulated_device: p.oversight_module.is_fda_regulated_device,
    },
    has_results,
    start_date: registry_date(status.start_date_struct.as_ref()),
    primary_completion_date: registry_date(
      status.primary_completion_date_struct.as_ref(),
    ),
    completion_date: registry_date(status.completion_date_struct.as_ref()),
    last_update_posted: registry_date(
      status.last_update_post_date_struct.as_ref(),
    ),
    results_first_posted,
  })
}
