use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params_from_iter};

use landreg_core::{
    identity::{PublicKey, Signature},
    ids::*,
    model::{Coordinate, Parcel, Scope},
};

use crate::error::StorageError;
use crate::traits::{
    AuditLog, AuditRecord, AuthorityDirectory, HolderDirectory, ParcelStore, SlotUpdate,
    StoredAuditRecord,
};

const PARCEL_COLUMNS: &str = "parcel_id, village, area, boundary, owner_id, cultivator_id";

/// Ids bound per `IN` list; large desired sets are looked up in batches to
/// stay under SQLite's host parameter limit.
const IDS_PER_QUERY: usize = 500;

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// `?start, ?start+1, ...` for an IN list of `count` values.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_constraint(err: rusqlite::Error, context: &str) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            StorageError::ConstraintViolation(format!(
                "{context}: {}",
                msg.unwrap_or_else(|| e.to_string())
            ))
        }
        other => StorageError::Sqlite(other),
    }
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_with_busy_timeout(path: &str, busy_timeout: Duration) -> Result<Self, StorageError> {
        let storage = Self::open(path)?;
        storage.conn.busy_timeout(busy_timeout)?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start the transaction an assignment runs in. The write lock is taken
    /// immediately, so nothing read through the returned handle can change
    /// under it before commit.
    pub fn begin_assignment(&mut self) -> Result<SqliteAssignmentTx<'_>, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteAssignmentTx { tx })
    }

    pub fn insert_holder(&self, holder_id: &HolderId, display_name: &str) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO holders (holder_id, display_name) VALUES (?1, ?2)",
                rusqlite::params![holder_id.as_str(), display_name],
            )
            .map_err(|e| map_constraint(e, &format!("holder {holder_id}")))?;
        Ok(())
    }

    pub fn insert_authority(
        &mut self,
        authority_id: &AuthorityId,
        display_name: &str,
        villages: &[&str],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO authorities (authority_id, display_name) VALUES (?1, ?2)",
            rusqlite::params![authority_id.as_str(), display_name],
        )
        .map_err(|e| map_constraint(e, &format!("authority {authority_id}")))?;
        for village in villages {
            tx.execute(
                "INSERT INTO authority_villages (authority_id, village) VALUES (?1, ?2)",
                rusqlite::params![authority_id.as_str(), village],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the villages an authority manages.
    pub fn set_managed_villages(
        &mut self,
        authority_id: &AuthorityId,
        villages: &[&str],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM authorities WHERE authority_id = ?1",
                rusqlite::params![authority_id.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(StorageError::NotFound(format!("authority {authority_id}")));
        }
        tx.execute(
            "DELETE FROM authority_villages WHERE authority_id = ?1",
            rusqlite::params![authority_id.as_str()],
        )?;
        for village in villages {
            tx.execute(
                "INSERT INTO authority_villages (authority_id, village) VALUES (?1, ?2)",
                rusqlite::params![authority_id.as_str(), village],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_parcel(&self, parcel: &Parcel) -> Result<(), StorageError> {
        let boundary = rmp_serde::to_vec(&parcel.boundary)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO parcels (parcel_id, village, area, boundary, owner_id, cultivator_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    parcel.id.as_str(),
                    parcel.village,
                    parcel.area,
                    boundary,
                    parcel.owner.as_ref().map(HolderId::as_str),
                    parcel.cultivator.as_ref().map(HolderId::as_str),
                ],
            )
            .map_err(|e| map_constraint(e, &format!("parcel {}", parcel.id)))?;
        Ok(())
    }

    /// Unscoped lookup, for administrative reads outside an assignment.
    pub fn get_parcel(&self, parcel_id: &ParcelId) -> Result<Option<Parcel>, StorageError> {
        let parcel = self
            .conn
            .query_row(
                &format!("SELECT {PARCEL_COLUMNS} FROM parcels WHERE parcel_id = ?1"),
                rusqlite::params![parcel_id.as_str()],
                read_parcel,
            )
            .optional()?;
        Ok(parcel)
    }

    pub fn list_parcels(&self) -> Result<Vec<Parcel>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PARCEL_COLUMNS} FROM parcels ORDER BY parcel_id"))?;
        let parcels = stmt
            .query_map([], read_parcel)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parcels)
    }

    pub fn parcels_in_village(&self, village: &str) -> Result<Vec<Parcel>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PARCEL_COLUMNS} FROM parcels WHERE village = ?1 ORDER BY parcel_id"
        ))?;
        let parcels = stmt
            .query_map(rusqlite::params![village], read_parcel)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parcels)
    }
}

/// An open IMMEDIATE transaction. Dropped without `commit` it rolls back.
pub struct SqliteAssignmentTx<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl SqliteAssignmentTx<'_> {
    pub fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }
}

fn build_parcel(
    id: String,
    village: String,
    area: f64,
    boundary_bytes: Vec<u8>,
    owner: Option<String>,
    cultivator: Option<String>,
) -> Result<Parcel, StorageError> {
    let boundary: Vec<Coordinate> = rmp_serde::from_slice(&boundary_bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let parcel = Parcel::new(ParcelId::new(id)?, village, area)?
        .with_boundary(boundary)
        .with_owner(owner.map(HolderId::new).transpose()?)
        .with_cultivator(cultivator.map(HolderId::new).transpose()?);
    Ok(parcel)
}

fn read_parcel(row: &rusqlite::Row) -> rusqlite::Result<Parcel> {
    let id: String = row.get(0)?;
    let village: String = row.get(1)?;
    let area: f64 = row.get(2)?;
    let boundary_bytes: Vec<u8> = row.get(3)?;
    let owner: Option<String> = row.get(4)?;
    let cultivator: Option<String> = row.get(5)?;
    build_parcel(id, village, area, boundary_bytes, owner, cultivator).map_err(tunnel)
}

fn tunnel(err: StorageError) -> rusqlite::Error {
    match err {
        StorageError::Sqlite(sq) => sq,
        other => rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Blob,
            Box::new(OpaqueStorageError(other.to_string())),
        ),
    }
}

fn query_parcels_by_ids(
    conn: &Connection,
    ids: &[&ParcelId],
    scope: &Scope,
) -> Result<Vec<Parcel>, StorageError> {
    if ids.is_empty() || scope.is_empty() {
        return Ok(Vec::new());
    }
    let mut parcels = Vec::new();
    for chunk in ids.chunks(IDS_PER_QUERY) {
        let sql = format!(
            "SELECT {PARCEL_COLUMNS} FROM parcels WHERE parcel_id IN ({}) AND village IN ({})",
            placeholders(1, chunk.len()),
            placeholders(chunk.len() + 1, scope.len()),
        );
        let values: Vec<&str> = chunk
            .iter()
            .map(|id| id.as_str())
            .chain(scope.villages())
            .collect();
        let mut stmt = conn.prepare(&sql)?;
        for parcel in stmt.query_map(params_from_iter(values.iter()), read_parcel)? {
            parcels.push(parcel?);
        }
    }
    parcels.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(parcels)
}

fn query_parcels_by_holder(
    conn: &Connection,
    holder_id: &HolderId,
    scope: &Scope,
) -> Result<Vec<Parcel>, StorageError> {
    if scope.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {PARCEL_COLUMNS} FROM parcels WHERE (owner_id = ?1 OR cultivator_id = ?1) AND village IN ({}) ORDER BY parcel_id",
        placeholders(2, scope.len()),
    );
    let values: Vec<&str> = std::iter::once(holder_id.as_str())
        .chain(scope.villages())
        .collect();
    let mut stmt = conn.prepare(&sql)?;
    let parcels = stmt
        .query_map(params_from_iter(values.iter()), read_parcel)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parcels)
}

fn update_slots(
    conn: &Connection,
    parcel_id: &ParcelId,
    update: &SlotUpdate,
) -> Result<(), StorageError> {
    if update.is_empty() {
        return Ok(());
    }
    let mut assignments = Vec::new();
    let mut values: Vec<Option<&str>> = Vec::new();
    if let Some(owner) = &update.owner {
        values.push(owner.as_ref().map(HolderId::as_str));
        assignments.push(format!("owner_id = ?{}", values.len()));
    }
    if let Some(cultivator) = &update.cultivator {
        values.push(cultivator.as_ref().map(HolderId::as_str));
        assignments.push(format!("cultivator_id = ?{}", values.len()));
    }
    values.push(Some(parcel_id.as_str()));
    let sql = format!(
        "UPDATE parcels SET {} WHERE parcel_id = ?{}",
        assignments.join(", "),
        values.len()
    );
    let changed = conn
        .execute(&sql, params_from_iter(values.iter()))
        .map_err(|e| map_constraint(e, &format!("parcel {parcel_id}")))?;
    if changed == 0 {
        return Err(StorageError::NotFound(format!("parcel {parcel_id}")));
    }
    tracing::debug!(parcel = %parcel_id, "parcel slots updated");
    Ok(())
}

fn query_managed_villages(
    conn: &Connection,
    authority_id: &AuthorityId,
) -> Result<Option<Vec<String>>, StorageError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM authorities WHERE authority_id = ?1",
            rusqlite::params![authority_id.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT village FROM authority_villages WHERE authority_id = ?1 ORDER BY village",
    )?;
    let villages = stmt
        .query_map(rusqlite::params![authority_id.as_str()], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(Some(villages))
}

fn query_display_name(
    conn: &Connection,
    holder_id: &HolderId,
) -> Result<Option<String>, StorageError> {
    let name = conn
        .query_row(
            "SELECT display_name FROM holders WHERE holder_id = ?1",
            rusqlite::params![holder_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}

impl ParcelStore for SqliteAssignmentTx<'_> {
    fn find_parcels_by_ids(
        &self,
        ids: &[&ParcelId],
        scope: &Scope,
    ) -> Result<Vec<Parcel>, StorageError> {
        query_parcels_by_ids(&self.tx, ids, scope)
    }

    fn find_parcels_by_holder_in_villages(
        &self,
        holder_id: &HolderId,
        scope: &Scope,
    ) -> Result<Vec<Parcel>, StorageError> {
        query_parcels_by_holder(&self.tx, holder_id, scope)
    }

    fn update_parcel_slots(
        &mut self,
        parcel_id: &ParcelId,
        update: &SlotUpdate,
    ) -> Result<(), StorageError> {
        update_slots(&self.tx, parcel_id, update)
    }
}

impl AuthorityDirectory for SqliteAssignmentTx<'_> {
    fn get_managed_villages(
        &self,
        authority_id: &AuthorityId,
    ) -> Result<Option<Vec<String>>, StorageError> {
        query_managed_villages(&self.tx, authority_id)
    }
}

impl HolderDirectory for SqliteAssignmentTx<'_> {
    fn get_display_name(&self, holder_id: &HolderId) -> Result<Option<String>, StorageError> {
        query_display_name(&self.tx, holder_id)
    }
}

impl AuthorityDirectory for SqliteStorage {
    fn get_managed_villages(
        &self,
        authority_id: &AuthorityId,
    ) -> Result<Option<Vec<String>>, StorageError> {
        query_managed_villages(&self.conn, authority_id)
    }
}

impl HolderDirectory for SqliteStorage {
    fn get_display_name(&self, holder_id: &HolderId) -> Result<Option<String>, StorageError> {
        query_display_name(&self.conn, holder_id)
    }
}

fn query_last_audit_hash(conn: &Connection) -> Result<Option<[u8; 32]>, StorageError> {
    let hash: Option<Vec<u8>> = conn
        .query_row(
            "SELECT entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    hash.map(|h| to_array::<32>(h, "entry_hash")).transpose()
}

fn insert_audit(conn: &Connection, record: &AuditRecord) -> Result<i64, StorageError> {
    conn.execute(
        "INSERT INTO audit_log (entry_id, category, actor_id, action, details, prev_hash, entry_hash, signer, signature) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            record.entry_id.as_bytes().as_slice(),
            record.category,
            record.actor_id,
            record.action,
            record.details,
            record.prev_hash.as_ref().map(|h| h.as_slice()),
            record.entry_hash.as_slice(),
            record.signer.as_bytes().as_slice(),
            record.signature.as_bytes().as_slice(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl AuditLog for SqliteStorage {
    fn append_chained(
        &mut self,
        build: &mut dyn FnMut(Option<[u8; 32]>) -> AuditRecord,
    ) -> Result<i64, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tail = query_last_audit_hash(&tx)?;
        let record = build(tail);
        if record.prev_hash != tail {
            return Err(StorageError::ConstraintViolation(
                "audit record does not link to the current tail".into(),
            ));
        }
        let seq = insert_audit(&tx, &record)?;
        tx.commit()?;
        Ok(seq)
    }

    fn audit_entries(&self) -> Result<Vec<StoredAuditRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, recorded_at, entry_id, category, actor_id, action, details, prev_hash, entry_hash, signer, signature FROM audit_log ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Vec<u8>>(6)?,
                row.get::<_, Option<Vec<u8>>>(7)?,
                row.get::<_, Vec<u8>>(8)?,
                row.get::<_, Vec<u8>>(9)?,
                row.get::<_, Vec<u8>>(10)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (
                seq,
                recorded_at,
                entry_id_bytes,
                category,
                actor_id,
                action,
                details,
                prev_hash_bytes,
                entry_hash_bytes,
                signer_bytes,
                signature_bytes,
            ) = row?;
            result.push(StoredAuditRecord {
                seq,
                recorded_at,
                record: AuditRecord {
                    entry_id: AuditEntryId::from_bytes(to_array::<16>(entry_id_bytes, "entry_id")?),
                    category,
                    actor_id,
                    action,
                    details,
                    prev_hash: prev_hash_bytes
                        .map(|h| to_array::<32>(h, "prev_hash"))
                        .transpose()?,
                    entry_hash: to_array::<32>(entry_hash_bytes, "entry_hash")?,
                    signer: PublicKey::from_bytes(to_array::<32>(signer_bytes, "signer")?),
                    signature: Signature::from_bytes(to_array::<64>(signature_bytes, "signature")?),
                },
            });
        }
        Ok(result)
    }
}

/// Wrapper error type used to tunnel StorageError through rusqlite's error system
/// in query_map closures that must return rusqlite::Error.
#[derive(Debug)]
struct OpaqueStorageError(String);

impl std::fmt::Display for OpaqueStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OpaqueStorageError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ParcelId {
        ParcelId::new(s).unwrap()
    }

    fn hid(s: &str) -> HolderId {
        HolderId::new(s).unwrap()
    }

    fn seeded() -> Result<SqliteStorage, StorageError> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.insert_holder(&hid("F1"), "Ion Popescu")?;
        storage.insert_holder(&hid("F2"), "Maria Ionescu")?;
        storage.insert_authority(&AuthorityId::new("M1")?, "Primaria Valea", &["Valea"])?;
        storage.insert_parcel(
            &Parcel::new(pid("P1"), "Valea", 1.2)?
                .with_boundary(vec![(45.1, 24.2), (45.2, 24.3), (45.1, 24.4)])
                .with_owner(Some(hid("F2"))),
        )?;
        storage.insert_parcel(&Parcel::new(pid("P2"), "Valea", 0.8)?.with_cultivator(Some(hid("F1"))))?;
        storage.insert_parcel(&Parcel::new(pid("P9"), "Deal", 3.0)?.with_owner(Some(hid("F1"))))?;
        Ok(storage)
    }

    #[test]
    fn parcel_roundtrips_with_boundary() -> Result<(), Box<dyn std::error::Error>> {
        let storage = seeded()?;
        let parcel = storage.get_parcel(&pid("P1"))?.unwrap();
        assert_eq!(parcel.boundary.len(), 3);
        assert_eq!(parcel.owner, Some(hid("F2")));
        assert_eq!(parcel.cultivator, None);
        assert!(storage.get_parcel(&pid("P404"))?.is_none());
        Ok(())
    }

    #[test]
    fn lookups_never_leave_the_scope() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = seeded()?;
        let scope = Scope::new(["Valea"]);
        let tx = storage.begin_assignment()?;

        let (p1, p9) = (pid("P1"), pid("P9"));
        let found = tx.find_parcels_by_ids(&[&p1, &p9], &scope)?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, p1);

        let held = tx.find_parcels_by_holder_in_villages(&hid("F1"), &scope)?;
        let ids: Vec<&str> = held.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["P2"]);

        assert!(tx.find_parcels_by_ids(&[&p1], &Scope::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn id_lookup_spans_many_batches() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = seeded()?;
        let scope = Scope::new(["Valea", "Deal"]);
        let mut wanted: Vec<ParcelId> = (0..40_000).map(|i| pid(&format!("X{i}"))).collect();
        wanted.extend([pid("P9"), pid("P2"), pid("P1")]);
        let refs: Vec<&ParcelId> = wanted.iter().collect();

        let tx = storage.begin_assignment()?;
        let found = tx.find_parcels_by_ids(&refs, &scope)?;
        let ids: Vec<&str> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2", "P9"]);
        Ok(())
    }

    #[test]
    fn schema_version_is_recorded_once() -> Result<(), Box<dyn std::error::Error>> {
        let storage = seeded()?;
        crate::schema::init_schema(storage.conn())?;
        let versions: Vec<i32> = storage
            .conn()
            .prepare("SELECT version FROM schema_version")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        assert_eq!(versions, vec![crate::schema::SCHEMA_VERSION]);
        Ok(())
    }

    #[test]
    fn dropped_transaction_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = seeded()?;
        {
            let mut tx = storage.begin_assignment()?;
            tx.update_parcel_slots(
                &pid("P1"),
                &SlotUpdate {
                    owner: Some(Some(hid("F1"))),
                    cultivator: None,
                },
            )?;
        }
        assert_eq!(storage.get_parcel(&pid("P1"))?.unwrap().owner, Some(hid("F2")));

        let mut tx = storage.begin_assignment()?;
        tx.update_parcel_slots(
            &pid("P1"),
            &SlotUpdate {
                owner: Some(None),
                cultivator: Some(Some(hid("F1"))),
            },
        )?;
        tx.commit()?;
        let parcel = storage.get_parcel(&pid("P1"))?.unwrap();
        assert_eq!(parcel.owner, None);
        assert_eq!(parcel.cultivator, Some(hid("F1")));
        Ok(())
    }

    #[test]
    fn updating_missing_parcel_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = seeded()?;
        let mut tx = storage.begin_assignment()?;
        let err = tx
            .update_parcel_slots(
                &pid("P404"),
                &SlotUpdate {
                    owner: Some(None),
                    cultivator: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        Ok(())
    }

    #[test]
    fn unknown_holder_reference_is_a_constraint_violation() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = seeded()?;
        let mut tx = storage.begin_assignment()?;
        let err = tx
            .update_parcel_slots(
                &pid("P1"),
                &SlotUpdate {
                    owner: Some(Some(hid("F404"))),
                    cultivator: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::ConstraintViolation(_)));
        Ok(())
    }

    #[test]
    fn directories_report_missing_records() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = seeded()?;
        let m1 = AuthorityId::new("M1")?;
        assert_eq!(storage.get_managed_villages(&m1)?, Some(vec!["Valea".to_string()]));
        assert_eq!(storage.get_managed_villages(&AuthorityId::new("M9")?)?, None);

        storage.set_managed_villages(&m1, &[])?;
        assert_eq!(storage.get_managed_villages(&m1)?, Some(Vec::new()));

        assert_eq!(storage.get_display_name(&hid("F1"))?.as_deref(), Some("Ion Popescu"));
        assert_eq!(storage.get_display_name(&hid("F404"))?, None);
        Ok(())
    }

    #[test]
    fn duplicate_parcel_and_bad_area_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let storage = seeded()?;
        let err = storage
            .insert_parcel(&Parcel::new(pid("P1"), "Valea", 1.0)?)
            .unwrap_err();
        assert!(matches!(err, StorageError::ConstraintViolation(_)));

        let mut bad = Parcel::new(pid("P5"), "Valea", 1.0)?;
        bad.area = 0.0;
        assert!(storage.insert_parcel(&bad).is_err());
        Ok(())
    }

    fn sample_record(prev_hash: Option<[u8; 32]>, tag: u8) -> AuditRecord {
        AuditRecord {
            entry_id: AuditEntryId::new(),
            category: "parcel_assignment".into(),
            actor_id: "M1".into(),
            action: "assign.applied".into(),
            details: vec![tag],
            prev_hash,
            entry_hash: [tag; 32],
            signer: PublicKey::from_bytes([7; 32]),
            signature: Signature::from_bytes([9; 64]),
        }
    }

    #[test]
    fn audit_log_is_append_only() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = seeded()?;
        assert_eq!(query_last_audit_hash(storage.conn())?, None);

        let first = sample_record(None, 1);
        let second = sample_record(Some(first.entry_hash), 2);
        let seq1 = storage.append_chained(&mut |_| first.clone())?;
        let seq2 = storage.append_chained(&mut |_| second.clone())?;
        assert!(seq2 > seq1);
        assert_eq!(query_last_audit_hash(storage.conn())?, Some([2; 32]));

        let entries = storage.audit_entries()?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record, first);
        assert_eq!(entries[1].record, second);

        assert!(storage.conn().execute("DELETE FROM audit_log", []).is_err());
        assert!(
            storage
                .conn()
                .execute("UPDATE audit_log SET action = 'edited'", [])
                .is_err()
        );
        assert_eq!(storage.audit_entries()?.len(), 2);
        Ok(())
    }

    #[test]
    fn append_is_built_from_the_tail() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = seeded()?;
        let mut seen = Vec::new();
        for tag in 1..=3u8 {
            storage.append_chained(&mut |tail| {
                seen.push(tail);
                sample_record(tail, tag)
            })?;
        }
        assert_eq!(seen, vec![None, Some([1; 32]), Some([2; 32])]);

        // A record that ignores the tail is refused and nothing is written.
        let err = storage
            .append_chained(&mut |_| sample_record(None, 4))
            .unwrap_err();
        assert!(matches!(err, StorageError::ConstraintViolation(_)));
        assert_eq!(storage.audit_entries()?.len(), 3);
        Ok(())
    }

    #[test]
    fn file_backed_storage_persists() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("registry.db");
        let path = path.to_str().unwrap();
        {
            let storage = SqliteStorage::open(path)?;
            storage.insert_holder(&hid("F1"), "Ion Popescu")?;
            storage.insert_parcel(&Parcel::new(pid("P1"), "Valea", 1.0)?.with_owner(Some(hid("F1"))))?;
        }
        let storage = SqliteStorage::open_with_busy_timeout(path, Duration::from_millis(100))?;
        assert_eq!(storage.get_parcel(&pid("P1"))?.unwrap().owner, Some(hid("F1")));
        Ok(())
    }
}
