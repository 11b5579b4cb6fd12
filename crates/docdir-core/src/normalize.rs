//! Canonical record normalizer: raw source payload → typed, validated record.
//!
//! Normalization is pure. Every rejection names the offending field by its
//! dotted path inside the payload.
//!
//! Value rules:
//! - `null`, a missing key and a whitespace-only string all mean "absent".
//! - Strings are trimmed. Numbers are accepted where text is expected.
//! - Numeric fields accept JSON numbers or numeric strings. Counts must be
//!   non-negative whole numbers; bounded fields are checked inclusively.
//! - List fields become ordered sequences of trimmed, non-empty strings. A
//!   bare string is treated as a one-element list.
//!
//! Name rule: a full name is split on whitespace. A single token becomes the
//! first name with an empty last name. Otherwise the last token is the last
//! name and all preceding tokens, joined by single spaces, form the first
//! name. `"Dr. Asha Rao"` → (`"Dr. Asha"`, `"Rao"`).

use chrono::NaiveTime;
use serde_json::{Map, Value};

use crate::{
  ValidationError,
  affiliation::AffiliationTerms,
  entity::{DoctorAttrs, EntityKind, EstablishmentAttrs, PersonName},
};

type Result<T> = std::result::Result<T, ValidationError>;

// ─── Canonical records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EstablishmentRecord {
  pub external_key: String,
  pub attrs:        EstablishmentAttrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoctorRecord {
  pub external_key: String,
  pub attrs:        DoctorAttrs,
}

/// An embedded profile. A stub that fails validation is kept as its error
/// instead of rejecting the record: it only matters when the entity it
/// describes is not known yet.
pub type Stub<A> = std::result::Result<A, ValidationError>;

/// One observation of a (doctor, establishment) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AffiliationRecord {
  pub doctor_key:         String,
  pub establishment_key:  String,
  pub terms:              AffiliationTerms,
  /// Minimal doctor profile embedded by the source; used only to create the
  /// doctor if it is not known yet.
  pub doctor_stub:        Option<Stub<DoctorAttrs>>,
  pub establishment_stub: Option<Stub<EstablishmentAttrs>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalRecord {
  Establishment(EstablishmentRecord),
  Doctor(DoctorRecord),
  Affiliation(AffiliationRecord),
}

impl CanonicalRecord {
  pub fn kind(&self) -> EntityKind {
    match self {
      Self::Establishment(_) => EntityKind::Establishment,
      Self::Doctor(_) => EntityKind::Doctor,
      Self::Affiliation(_) => EntityKind::Affiliation,
    }
  }
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Normalize one raw payload of the given kind.
pub fn normalize(kind: EntityKind, payload: &Value) -> Result<CanonicalRecord> {
  Ok(match kind {
    EntityKind::Establishment => {
      CanonicalRecord::Establishment(normalize_establishment(payload)?)
    }
    EntityKind::Doctor => CanonicalRecord::Doctor(normalize_doctor(payload)?),
    EntityKind::Affiliation => {
      CanonicalRecord::Affiliation(normalize_affiliation(payload)?)
    }
  })
}

pub fn normalize_establishment(payload: &Value) -> Result<EstablishmentRecord> {
  let fields = Fields::root(payload)?;
  Ok(EstablishmentRecord {
    external_key: fields.required_text("external_key")?,
    attrs:        establishment_attrs(&fields)?,
  })
}

pub fn normalize_doctor(payload: &Value) -> Result<DoctorRecord> {
  let fields = Fields::root(payload)?;
  Ok(DoctorRecord {
    external_key: fields.required_text("external_key")?,
    attrs:        doctor_attrs(&fields)?,
  })
}

pub fn normalize_affiliation(payload: &Value) -> Result<AffiliationRecord> {
  let fields = Fields::root(payload)?;

  let doctor_key = fields.required_text("doctor_key")?;
  let establishment_key = fields.required_text("establishment_key")?;

  let terms = AffiliationTerms {
    begin_time:     fields.time("begin_time")?,
    end_time:       fields.time("end_time")?,
    available_days: fields.list("available_days")?,
    fees:           fields.list_by("fees", fee_text)?,
  };

  Ok(AffiliationRecord {
    doctor_key,
    establishment_key,
    terms,
    doctor_stub: fields.stub("doctor", doctor_attrs),
    establishment_stub: fields.stub("establishment", establishment_attrs),
  })
}

/// Split a combined full name into first and last components.
///
/// Returns `None` when the input has no tokens at all.
pub fn split_full_name(full: &str) -> Option<PersonName> {
  let tokens: Vec<&str> = full.split_whitespace().collect();
  match tokens.split_last() {
    None => None,
    Some((only, [])) => Some(PersonName {
      first: (*only).to_owned(),
      last:  String::new(),
    }),
    Some((last, rest)) => Some(PersonName {
      first: rest.join(" "),
      last:  (*last).to_owned(),
    }),
  }
}

// ─── Per-kind attribute builders ─────────────────────────────────────────────

fn establishment_attrs(fields: &Fields<'_>) -> Result<EstablishmentAttrs> {
  let street_address = [fields.text("address_line1")?, fields.text("address_line2")?]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

  let attrs = EstablishmentAttrs {
    name:             Some(fields.required_text("name")?),
    slug:             fields.text("slug")?,
    practice_type:    fields.text("practice_type")?,
    profile_url:      fields.text("profile_url")?,
    image_url:        fields.text("image_url")?,
    street_address:   (!street_address.is_empty()).then(|| street_address.join(", ")),
    postal_code:      fields.text("zipcode")?,
    locality:         fields.text("locality")?,
    city:             fields.text("city")?,
    state:            fields.text("state")?,
    latitude:         fields.bounded("latitude", -90.0, 90.0)?,
    longitude:        fields.bounded("longitude", -180.0, 180.0)?,
    min_price:        fields.bounded("min_price", 0.0, f64::MAX)?,
    max_price:        fields.bounded("max_price", 0.0, f64::MAX)?,
    phone:            fields.text("phone")?,
    phone_extension:  fields.text("phone_extension")?,
    rating:           fields.bounded("rating", 0.0, 5.0)?,
    reviews_count:    fields.count("reviews_count")?,
    doctor_count:     fields.count("doctor_count")?,
    bed_count:        fields.count("bed_count")?,
    ambulance_count:  fields.count("ambulance_count")?,
    practice_timings: fields.text("practice_timings")?,
  };

  if let (Some(min), Some(max)) = (attrs.min_price, attrs.max_price)
    && min > max
  {
    return Err(ValidationError::new(
      fields.path("max_price"),
      format!("{max} is below min_price {min}"),
    ));
  }

  Ok(attrs)
}

fn doctor_attrs(fields: &Fields<'_>) -> Result<DoctorAttrs> {
  let full_name = fields.required_text("full_name")?;

  Ok(DoctorAttrs {
    name:                   split_full_name(&full_name),
    slug:                   fields.text("slug")?,
    rank:                   fields.count("rank")?,
    profile_photo:          fields.text("profile_photo")?,
    profile_url:            fields.text("profile_url")?,
    qualifications:         fields.list("qualifications")?,
    specialization:         fields.text("specialization")?,
    specialties:            fields.list_by("specialties", specialty_text)?,
    experience_years:       fields.count("experience_years")?,
    summary:                fields.text("summary")?,
    services:               fields.list("services")?,
    services_count:         fields.count("services_count")?,
    recommendation_percent: fields.bounded("recommendation_percent", 0.0, 100.0)?,
    patients_count:         fields.count("patients_count")?,
    reviews_count:          fields.count("reviews_count")?,
    establishment_count:    fields.count("establishment_count")?,
  })
}

// ─── Field access ────────────────────────────────────────────────────────────

/// Typed, path-aware accessors over one JSON object.
struct Fields<'a> {
  obj:    &'a Map<String, Value>,
  /// Path of this object inside the payload; empty at the root.
  prefix: &'static str,
}

impl<'a> Fields<'a> {
  fn root(payload: &'a Value) -> Result<Self> {
    payload
      .as_object()
      .map(|obj| Self { obj, prefix: "" })
      .ok_or_else(|| ValidationError::new("record", "expected a JSON object"))
  }

  fn path(&self, key: &str) -> String {
    if self.prefix.is_empty() {
      key.to_owned()
    } else {
      format!("{}.{key}", self.prefix)
    }
  }

  fn raw(&self, key: &str) -> Option<&'a Value> {
    self.obj.get(key).filter(|v| !v.is_null())
  }

  fn text(&self, key: &str) -> Result<Option<String>> {
    match self.raw(key) {
      None => Ok(None),
      Some(value) => scalar_text(value)
        .map(|s| non_empty(&s))
        .ok_or_else(|| ValidationError::new(self.path(key), "expected a string")),
    }
  }

  fn required_text(&self, key: &str) -> Result<String> {
    self.text(key)?.ok_or_else(|| ValidationError::missing(self.path(key)))
  }

  fn number(&self, key: &str) -> Result<Option<f64>> {
    let parsed = match self.raw(key) {
      None => return Ok(None),
      Some(Value::Number(n)) => n.as_f64(),
      Some(Value::String(s)) => {
        let s = s.trim();
        if s.is_empty() {
          return Ok(None);
        }
        s.parse::<f64>().ok()
      }
      Some(_) => None,
    };
    match parsed {
      Some(v) if v.is_finite() => Ok(Some(v)),
      _ => Err(ValidationError::new(self.path(key), "expected a number")),
    }
  }

  fn bounded(&self, key: &str, min: f64, max: f64) -> Result<Option<f64>> {
    match self.number(key)? {
      Some(v) if !(min..=max).contains(&v) => Err(ValidationError::new(
        self.path(key),
        format!("{v} is out of range"),
      )),
      other => Ok(other),
    }
  }

  fn count(&self, key: &str) -> Result<Option<u32>> {
    match self.number(key)? {
      None => Ok(None),
      Some(v) if v < 0.0 => {
        Err(ValidationError::new(self.path(key), format!("{v} is negative")))
      }
      Some(v) if v.fract() != 0.0 || v > f64::from(u32::MAX) => Err(
        ValidationError::new(self.path(key), format!("{v} is not a whole count")),
      ),
      Some(v) => Ok(Some(v as u32)),
    }
  }

  fn time(&self, key: &str) -> Result<Option<NaiveTime>> {
    let Some(text) = self.text(key)? else {
      return Ok(None);
    };
    parse_time(&text).map(Some).ok_or_else(|| {
      ValidationError::new(self.path(key), format!("unrecognised time {text:?}"))
    })
  }

  fn list(&self, key: &str) -> Result<Vec<String>> { self.list_by(key, scalar_text) }

  /// Read a list whose elements are turned into text by `element`; an element
  /// for which `element` returns `None` is rejected.
  fn list_by(
    &self,
    key: &str,
    element: fn(&Value) -> Option<String>,
  ) -> Result<Vec<String>> {
    let items = match self.raw(key) {
      None => return Ok(Vec::new()),
      Some(Value::Array(items)) => items.as_slice(),
      Some(single @ Value::String(_)) => std::slice::from_ref(single),
      Some(_) => {
        return Err(ValidationError::new(self.path(key), "expected a list"));
      }
    };

    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
      if item.is_null() {
        continue;
      }
      let text = element(item).ok_or_else(|| {
        ValidationError::new(
          format!("{}[{index}]", self.path(key)),
          "unsupported list element",
        )
      })?;
      out.extend(non_empty(&text));
    }
    Ok(out)
  }

  fn stub<A>(&self, key: &'static str, build: fn(&Fields<'_>) -> Result<A>) -> Option<Stub<A>> {
    self.object(key).transpose().map(|stub| stub.and_then(|fields| build(&fields)))
  }

  fn object(&self, key: &'static str) -> Result<Option<Fields<'a>>> {
    match self.raw(key) {
      None => Ok(None),
      Some(Value::Object(obj)) => Ok(Some(Fields { obj, prefix: key })),
      Some(_) => Err(ValidationError::new(self.path(key), "expected an object")),
    }
  }
}

fn non_empty(s: &str) -> Option<String> {
  let trimmed = s.trim();
  (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn scalar_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Specialties arrive either as plain strings or as objects carrying a
/// `sub_specialty` (or `name`) field.
fn specialty_text(value: &Value) -> Option<String> {
  match value {
    Value::Object(obj) => obj
      .get("sub_specialty")
      .or_else(|| obj.get("name"))
      .and_then(scalar_text),
    other => scalar_text(other),
  }
}

/// Fees arrive as plain strings/numbers or as `{ "amount": .., "type": .. }`.
fn fee_text(value: &Value) -> Option<String> {
  match value {
    Value::Object(obj) => {
      let amount = obj.get("amount").and_then(scalar_text)?;
      let kind = obj.get("type").and_then(scalar_text).unwrap_or_default();
      Some(format!("{amount} {}", kind.trim()))
    }
    other => scalar_text(other),
  }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
  ["%H:%M:%S", "%H:%M", "%I:%M %p", "%I:%M:%S %p"]
    .iter()
    .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn splits_names_on_the_last_token() {
    let name = split_full_name("Dr. Asha Rao").unwrap();
    assert_eq!(name.first, "Dr. Asha");
    assert_eq!(name.last, "Rao");

    let name = split_full_name("Rao").unwrap();
    assert_eq!(name.first, "Rao");
    assert_eq!(name.last, "");

    let name = split_full_name("  Dr.   K  S   Menon ").unwrap();
    assert_eq!(name.first, "Dr. K S");
    assert_eq!(name.last, "Menon");

    assert!(split_full_name("   ").is_none());
  }

  #[test]
  fn establishment_fields_are_trimmed_and_coerced() {
    let record = normalize_establishment(&json!({
      "external_key": " est-1 ",
      "name": "City Clinic",
      "address_line1": " 12 MG Road ",
      "address_line2": "",
      "latitude": "18.52",
      "rating": 4,
      "reviews_count": "120",
      "phone": "",
    }))
    .unwrap();

    assert_eq!(record.external_key, "est-1");
    assert_eq!(record.attrs.street_address.as_deref(), Some("12 MG Road"));
    assert_eq!(record.attrs.latitude, Some(18.52));
    assert_eq!(record.attrs.rating, Some(4.0));
    assert_eq!(record.attrs.reviews_count, Some(120));
    assert_eq!(record.attrs.phone, None);
  }

  #[test]
  fn missing_external_key_is_named() {
    let err = normalize_doctor(&json!({ "full_name": "Asha Rao" })).unwrap_err();
    assert_eq!(err.field, "external_key");

    let err = normalize_doctor(&json!({ "external_key": "  ", "full_name": "A" }))
      .unwrap_err();
    assert_eq!(err.field, "external_key");
  }

  #[test]
  fn out_of_range_rating_is_rejected() {
    let err = normalize_establishment(&json!({
      "external_key": "est-1", "name": "X", "rating": "5.5",
    }))
    .unwrap_err();
    assert_eq!(err.field, "rating");
  }

  #[test]
  fn negative_counts_are_rejected() {
    let err = normalize_doctor(&json!({
      "external_key": "doc-1", "full_name": "Asha Rao", "patients_count": -3,
    }))
    .unwrap_err();
    assert_eq!(err.field, "patients_count");

    let err = normalize_doctor(&json!({
      "external_key": "doc-1", "full_name": "Asha Rao", "experience_years": "ten",
    }))
    .unwrap_err();
    assert_eq!(err.field, "experience_years");
  }

  #[test]
  fn inverted_price_range_is_rejected() {
    let err = normalize_establishment(&json!({
      "external_key": "est-1", "name": "X", "min_price": 800, "max_price": "300",
    }))
    .unwrap_err();
    assert_eq!(err.field, "max_price");
  }

  #[test]
  fn list_fields_drop_empty_entries_and_keep_order() {
    let record = normalize_doctor(&json!({
      "external_key": "doc-1",
      "full_name": "Asha Rao",
      "qualifications": [" MBBS ", "", null, "MD"],
      "specialties": [{ "sub_specialty": "Cardiologist" }, "  Physician"],
      "services": "Angioplasty",
    }))
    .unwrap();

    assert_eq!(record.attrs.qualifications, ["MBBS", "MD"]);
    assert_eq!(record.attrs.specialties, ["Cardiologist", "Physician"]);
    assert_eq!(record.attrs.services, ["Angioplasty"]);
  }

  #[test]
  fn affiliation_terms_and_stubs() {
    let record = normalize_affiliation(&json!({
      "doctor_key": "doc-1",
      "establishment_key": "est-1",
      "begin_time": "09:00",
      "end_time": "17:30:00",
      "available_days": ["Mon", " ", "Wed"],
      "fees": [{ "amount": 500, "type": "consultation" }, 300],
      "doctor": { "full_name": "Asha Rao", "slug": "asha-rao" },
    }))
    .unwrap();

    assert_eq!(record.terms.begin_time, NaiveTime::from_hms_opt(9, 0, 0));
    assert_eq!(record.terms.end_time, NaiveTime::from_hms_opt(17, 30, 0));
    assert_eq!(record.terms.available_days, ["Mon", "Wed"]);
    assert_eq!(record.terms.fees, ["500 consultation", "300"]);
    let stub = record.doctor_stub.unwrap().unwrap();
    assert_eq!(stub.slug.as_deref(), Some("asha-rao"));
    assert!(record.establishment_stub.is_none());
  }

  #[test]
  fn invalid_stubs_do_not_reject_the_observation() {
    let record = normalize_affiliation(&json!({
      "doctor_key": "doc-1",
      "establishment_key": "est-1",
      "fees": ["500"],
      "establishment": { "slug": "clinic-est-1", "name": "" },
      "doctor": "Asha Rao",
    }))
    .unwrap();

    assert_eq!(record.terms.fees, ["500"]);
    let err = record.establishment_stub.unwrap().unwrap_err();
    assert_eq!(err.field, "establishment.name");
    let err = record.doctor_stub.unwrap().unwrap_err();
    assert_eq!(err.field, "doctor");
  }

  #[test]
  fn term_errors_reject_the_observation() {
    let err = normalize_affiliation(&json!({
      "doctor_key": "doc-1", "establishment_key": "est-1", "begin_time": "soon",
    }))
    .unwrap_err();
    assert_eq!(err.field, "begin_time");
  }

  #[test]
  fn non_object_payload_is_rejected() {
    let err = normalize(EntityKind::Doctor, &json!(["doc-1"])).unwrap_err();
    assert_eq!(err.field, "record");
  }
}
