//! [`SqliteStore`]: the SQLite implementation of [`DirectoryStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use docdir_core::{
  affiliation::Affiliation,
  audit::Stamped,
  entity::{Doctor, EntityKind, Establishment},
  store::DirectoryStore,
};

use crate::{
  encode::{
    AFFILIATION_COLUMNS, DOCTOR_COLUMNS, ESTABLISHMENT_COLUMNS, EncodedDoctorLists,
    RawAffiliation, RawDoctor, RawEstablishment, decode_uuid, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A provider directory backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mainly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run a single-id lookup query and decode the resulting UUID.
  async fn query_id(&self, sql: &'static str, params: Vec<String>) -> Result<Option<Uuid>> {
    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, rusqlite::params_from_iter(params.iter()), |row| row.get(0))
            .optional()?,
        )
      })
      .await?;

    raw.as_deref().map(decode_uuid).transpose()
  }

  /// Execute raw SQL outside the trait surface.
  #[cfg(test)]
  pub(crate) async fn execute_raw(&self, sql: &'static str) -> Result<usize> {
    Ok(self.conn.call(move |conn| Ok(conn.execute(sql, [])?)).await?)
  }
}

// ─── DirectoryStore impl ─────────────────────────────────────────────────────

impl DirectoryStore for SqliteStore {
  type Error = Error;

  // ── Identity map ──────────────────────────────────────────────────────────

  async fn lookup_identity(&self, kind: EntityKind, external_key: String) -> Result<Option<Uuid>> {
    self
      .query_id(
        "SELECT internal_id FROM identities WHERE kind = ?1 AND external_key = ?2",
        vec![kind.as_str().to_owned(), external_key],
      )
      .await
  }

  async fn bind_identity(
    &self,
    kind: EntityKind,
    external_key: String,
    candidate: Uuid,
  ) -> Result<Uuid> {
    let kind_str      = kind.as_str().to_owned();
    let candidate_str = encode_uuid(candidate);
    let at_str        = encode_dt(Utc::now());

    let bound: String = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO identities (kind, external_key, internal_id, bound_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (kind, external_key) DO NOTHING",
          rusqlite::params![kind_str, external_key, candidate_str, at_str],
        )?;
        let bound: String = tx.query_row(
          "SELECT internal_id FROM identities WHERE kind = ?1 AND external_key = ?2",
          rusqlite::params![kind_str, external_key],
          |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(bound)
      })
      .await?;

    decode_uuid(&bound)
  }

  async fn entity_id_for_key(
    &self,
    kind: EntityKind,
    external_key: String,
  ) -> Result<Option<Uuid>> {
    let sql = match kind {
      EntityKind::Establishment => {
        "SELECT establishment_id FROM establishments WHERE external_key = ?1"
      }
      EntityKind::Doctor => "SELECT doctor_id FROM doctors WHERE external_key = ?1",
      // Affiliation rows are keyed by their pair, not by an external key.
      EntityKind::Affiliation => return Ok(None),
    };
    self.query_id(sql, vec![external_key]).await
  }

  // ── Establishments ────────────────────────────────────────────────────────

  async fn get_establishment(&self, id: Uuid) -> Result<Option<Establishment>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawEstablishment> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ESTABLISHMENT_COLUMNS} FROM establishments WHERE establishment_id = ?1"
              ),
              rusqlite::params![id_str],
              RawEstablishment::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEstablishment::into_establishment).transpose()
  }

  async fn put_establishment(&self, row: Stamped<Establishment>) -> Result<()> {
    let e          = row.into_inner();
    let id_str     = encode_uuid(e.establishment_id);
    let created_at = encode_dt(e.created_at);
    let updated_at = encode_dt(e.updated_at);

    self
      .conn
      .call(move |conn| {
        let a = &e.attrs;
        conn.execute(
          &format!(
            "INSERT INTO establishments ({ESTABLISHMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)
             ON CONFLICT (establishment_id) DO UPDATE SET
               name             = excluded.name,
               slug             = excluded.slug,
               practice_type    = excluded.practice_type,
               profile_url      = excluded.profile_url,
               image_url        = excluded.image_url,
               street_address   = excluded.street_address,
               postal_code      = excluded.postal_code,
               locality         = excluded.locality,
               city             = excluded.city,
               state            = excluded.state,
               latitude         = excluded.latitude,
               longitude        = excluded.longitude,
               min_price        = excluded.min_price,
               max_price        = excluded.max_price,
               phone            = excluded.phone,
               phone_extension  = excluded.phone_extension,
               rating           = excluded.rating,
               reviews_count    = excluded.reviews_count,
               doctor_count     = excluded.doctor_count,
               bed_count        = excluded.bed_count,
               ambulance_count  = excluded.ambulance_count,
               practice_timings = excluded.practice_timings,
               active           = excluded.active,
               updated_at       = excluded.updated_at"
          ),
          rusqlite::params![
            id_str,
            e.external_key,
            a.name,
            a.slug,
            a.practice_type,
            a.profile_url,
            a.image_url,
            a.street_address,
            a.postal_code,
            a.locality,
            a.city,
            a.state,
            a.latitude,
            a.longitude,
            a.min_price,
            a.max_price,
            a.phone,
            a.phone_extension,
            a.rating,
            a.reviews_count,
            a.doctor_count,
            a.bed_count,
            a.ambulance_count,
            a.practice_timings,
            e.active,
            created_at,
            updated_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_establishments(&self, include_inactive: bool) -> Result<Vec<Establishment>> {
    let raws: Vec<RawEstablishment> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ESTABLISHMENT_COLUMNS} FROM establishments
           WHERE active = 1 OR ?1
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![include_inactive], RawEstablishment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEstablishment::into_establishment).collect()
  }

  // ── Doctors ───────────────────────────────────────────────────────────────

  async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawDoctor> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE doctor_id = ?1"),
              rusqlite::params![id_str],
              RawDoctor::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDoctor::into_doctor).transpose()
  }

  async fn put_doctor(&self, row: Stamped<Doctor>) -> Result<()> {
    let d          = row.into_inner();
    let id_str     = encode_uuid(d.doctor_id);
    let lists      = EncodedDoctorLists::new(&d.attrs)?;
    let created_at = encode_dt(d.created_at);
    let updated_at = encode_dt(d.updated_at);

    self
      .conn
      .call(move |conn| {
        let a = &d.attrs;
        let (first_name, last_name) = match &a.name {
          Some(name) => (Some(name.first.as_str()), Some(name.last.as_str())),
          None => (None, None),
        };
        conn.execute(
          &format!(
            "INSERT INTO doctors ({DOCTOR_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
             ON CONFLICT (doctor_id) DO UPDATE SET
               first_name             = excluded.first_name,
               last_name              = excluded.last_name,
               slug                   = excluded.slug,
               listing_rank           = excluded.listing_rank,
               profile_photo          = excluded.profile_photo,
               profile_url            = excluded.profile_url,
               qualifications         = excluded.qualifications,
               specialization         = excluded.specialization,
               specialties            = excluded.specialties,
               experience_years       = excluded.experience_years,
               summary                = excluded.summary,
               services               = excluded.services,
               services_count         = excluded.services_count,
               recommendation_percent = excluded.recommendation_percent,
               patients_count         = excluded.patients_count,
               reviews_count          = excluded.reviews_count,
               establishment_count    = excluded.establishment_count,
               active                 = excluded.active,
               updated_at             = excluded.updated_at"
          ),
          rusqlite::params![
            id_str,
            d.external_key,
            first_name,
            last_name,
            a.slug,
            a.rank,
            a.profile_photo,
            a.profile_url,
            lists.qualifications,
            a.specialization,
            lists.specialties,
            a.experience_years,
            a.summary,
            lists.services,
            a.services_count,
            a.recommendation_percent,
            a.patients_count,
            a.reviews_count,
            a.establishment_count,
            d.active,
            created_at,
            updated_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_doctors(&self, include_inactive: bool) -> Result<Vec<Doctor>> {
    let raws: Vec<RawDoctor> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {DOCTOR_COLUMNS} FROM doctors
           WHERE active = 1 OR ?1
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![include_inactive], RawDoctor::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDoctor::into_doctor).collect()
  }

  // ── Affiliations ──────────────────────────────────────────────────────────

  async fn affiliations_for_establishment(
    &self,
    establishment_id: Uuid,
    include_inactive: bool,
  ) -> Result<Vec<Affiliation>> {
    let id_str = encode_uuid(establishment_id);

    let raws: Vec<RawAffiliation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {AFFILIATION_COLUMNS} FROM affiliations
           WHERE establishment_id = ?1 AND (active = 1 OR ?2)
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str, include_inactive], RawAffiliation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAffiliation::into_affiliation).collect()
  }

  async fn put_affiliations(&self, rows: Vec<Stamped<Affiliation>>) -> Result<()> {
    if rows.is_empty() {
      return Ok(());
    }

    let encoded = rows
      .iter()
      .map(|row| RawAffiliation::encode(row.get()))
      .collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(&format!(
            "INSERT INTO affiliations ({AFFILIATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (affiliation_id) DO UPDATE SET
               begin_time     = excluded.begin_time,
               end_time       = excluded.end_time,
               available_days = excluded.available_days,
               fees           = excluded.fees,
               active         = excluded.active,
               updated_at     = excluded.updated_at"
          ))?;
          for a in &encoded {
            stmt.execute(rusqlite::params![
              a.affiliation_id,
              a.doctor_id,
              a.establishment_id,
              a.begin_time,
              a.end_time,
              a.available_days,
              a.fees,
              a.active,
              a.created_at,
              a.updated_at,
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
