//! Signed, hash-chained audit trail of assignment attempts.

use serde::{Deserialize, Serialize};

use landreg_core::{
    AssignmentRequest, AuditEntryId, AuthorityId, Conflict, CoreError, HolderId, ParcelId, Slot,
    identity::{ServiceIdentity, verify_signature},
};
use landreg_storage::{AuditLog, AuditRecord, StoredAuditRecord};

use crate::error::EngineError;

pub const AUDIT_CATEGORY: &str = "parcel_assignment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub parcel_id: ParcelId,
    pub slot: Slot,
    pub incumbent: HolderId,
}

impl From<&Conflict> for ConflictSummary {
    fn from(conflict: &Conflict) -> Self {
        Self {
            parcel_id: conflict.parcel_id.clone(),
            slot: conflict.slot,
            incumbent: conflict.incumbent_holder_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Applied {
        changes: usize,
        parcels: Vec<ParcelId>,
    },
    Conflicts {
        conflicts: Vec<ConflictSummary>,
    },
    Rejected {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl AuditOutcome {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "assign.applied",
            Self::Conflicts { .. } => "assign.conflicts",
            Self::Rejected { .. } => "assign.rejected",
            Self::Failed { .. } => "assign.failed",
        }
    }
}

/// Details stored with every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentAudit {
    pub target: HolderId,
    pub desired_owned: Vec<ParcelId>,
    pub desired_cultivated: Vec<ParcelId>,
    pub force: bool,
    pub outcome: AuditOutcome,
}

impl AssignmentAudit {
    pub fn new(request: &AssignmentRequest, outcome: AuditOutcome) -> Self {
        Self {
            target: request.target.clone(),
            desired_owned: request.desired_owned.iter().cloned().collect(),
            desired_cultivated: request.desired_cultivated.iter().cloned().collect(),
            force: request.force,
            outcome,
        }
    }
}

/// A decoded audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub seq: i64,
    pub recorded_at: i64,
    pub actor_id: String,
    pub action: String,
    pub details: AssignmentAudit,
}

/// BLAKE3 over the entry's content and its predecessor's hash.
/// Variable-length fields are length-prefixed.
pub fn entry_digest(
    entry_id: &AuditEntryId,
    category: &str,
    actor_id: &str,
    action: &str,
    details: &[u8],
    prev_hash: Option<&[u8; 32]>,
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(entry_id.as_bytes());
    for field in [category.as_bytes(), actor_id.as_bytes(), action.as_bytes(), details] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    match prev_hash {
        Some(hash) => {
            hasher.update(&[1u8]);
            hasher.update(hash);
        }
        None => {
            hasher.update(&[0u8]);
        }
    }
    *hasher.finalize().as_bytes()
}

pub struct AuditRecorder {
    category: String,
    enabled: bool,
}

impl AuditRecorder {
    pub fn new(category: impl Into<String>, enabled: bool) -> Self {
        Self {
            category: category.into(),
            enabled,
        }
    }

    /// Append one entry, chained to the current tail. Returns its sequence
    /// number, or `None` when auditing is switched off.
    pub fn record<L>(
        &self,
        log: &mut L,
        identity: &ServiceIdentity,
        actor: &AuthorityId,
        details: &AssignmentAudit,
    ) -> Result<Option<i64>, EngineError>
    where
        L: AuditLog + ?Sized,
    {
        if !self.enabled {
            return Ok(None);
        }
        let payload = rmp_serde::to_vec_named(details)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        let action = details.outcome.action();
        let seq = log.append_chained(&mut |prev_hash| {
            let entry_id = AuditEntryId::new();
            let entry_hash = entry_digest(
                &entry_id,
                &self.category,
                actor.as_str(),
                action,
                &payload,
                prev_hash.as_ref(),
            );
            AuditRecord {
                entry_id,
                category: self.category.clone(),
                actor_id: actor.as_str().to_string(),
                action: action.to_string(),
                details: payload.clone(),
                prev_hash,
                entry_hash,
                signer: identity.public_key(),
                signature: identity.sign(&entry_hash),
            }
        })?;
        Ok(Some(seq))
    }
}

pub fn decode_entry(stored: &StoredAuditRecord) -> Result<AuditEntry, EngineError> {
    let details: AssignmentAudit = rmp_serde::from_slice(&stored.record.details)
        .map_err(|e| CoreError::Serialization(e.to_string()))?;
    Ok(AuditEntry {
        seq: stored.seq,
        recorded_at: stored.recorded_at,
        actor_id: stored.record.actor_id.clone(),
        action: stored.record.action.clone(),
        details,
    })
}

/// Check hash linkage, content hashes and signatures of a whole trail.
/// Returns the number of entries verified.
pub fn verify_chain(entries: &[StoredAuditRecord]) -> Result<usize, EngineError> {
    let mut expected_prev: Option<[u8; 32]> = None;
    for stored in entries {
        let record = &stored.record;
        let broken = |reason: &str| EngineError::AuditChainBroken {
            seq: stored.seq,
            reason: reason.to_string(),
        };
        if record.prev_hash != expected_prev {
            return Err(broken("previous hash does not match"));
        }
        let digest = entry_digest(
            &record.entry_id,
            &record.category,
            &record.actor_id,
            &record.action,
            &record.details,
            record.prev_hash.as_ref(),
        );
        if digest != record.entry_hash {
            return Err(broken("content hash mismatch"));
        }
        verify_signature(&record.signer, &record.entry_hash, &record.signature)
            .map_err(|_| broken("bad signature"))?;
        expected_prev = Some(record.entry_hash);
    }
    Ok(entries.len())
}
