use landreg_core::{
    identity::{PublicKey, Signature},
    ids::*,
    model::{Parcel, Scope},
    reconcile::ParcelPatch,
};

use crate::error::StorageError;

/// New values for a parcel's slots. `None` leaves the slot untouched,
/// `Some(None)` empties it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotUpdate {
    pub owner: Option<Option<HolderId>>,
    pub cultivator: Option<Option<HolderId>>,
}

impl SlotUpdate {
    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.cultivator.is_none()
    }
}

impl From<&ParcelPatch> for SlotUpdate {
    fn from(patch: &ParcelPatch) -> Self {
        Self {
            owner: patch.new_value(landreg_core::Slot::Owner),
            cultivator: patch.new_value(landreg_core::Slot::Cultivator),
        }
    }
}

/// Parcel access inside a transaction boundary owned by the caller.
/// Parcels whose village is outside `scope` are never returned.
pub trait ParcelStore {
    fn find_parcels_by_ids(
        &self,
        ids: &[&ParcelId],
        scope: &Scope,
    ) -> Result<Vec<Parcel>, StorageError>;

    fn find_parcels_by_holder_in_villages(
        &self,
        holder_id: &HolderId,
        scope: &Scope,
    ) -> Result<Vec<Parcel>, StorageError>;

    fn update_parcel_slots(
        &mut self,
        parcel_id: &ParcelId,
        update: &SlotUpdate,
    ) -> Result<(), StorageError>;
}

pub trait AuthorityDirectory {
    /// `None` when the authority does not exist.
    fn get_managed_villages(
        &self,
        authority_id: &AuthorityId,
    ) -> Result<Option<Vec<String>>, StorageError>;
}

pub trait HolderDirectory {
    /// `None` when the holder does not exist.
    fn get_display_name(&self, holder_id: &HolderId) -> Result<Option<String>, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub entry_id: AuditEntryId,
    pub category: String,
    pub actor_id: String,
    pub action: String,
    /// MessagePack-encoded details.
    pub details: Vec<u8>,
    pub prev_hash: Option<[u8; 32]>,
    pub entry_hash: [u8; 32],
    pub signer: PublicKey,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAuditRecord {
    pub seq: i64,
    /// Unix milliseconds.
    pub recorded_at: i64,
    pub record: AuditRecord,
}

/// Append-only audit trail.
pub trait AuditLog {
    /// Append the record `build` makes from the hash of the current last
    /// entry. The tail read and the insert hold one write lock, so writers
    /// sharing the log cannot fork the chain. Returns the new sequence number.
    fn append_chained(
        &mut self,
        build: &mut dyn FnMut(Option<[u8; 32]>) -> AuditRecord,
    ) -> Result<i64, StorageError>;

    fn audit_entries(&self) -> Result<Vec<StoredAuditRecord>, StorageError>;
}
