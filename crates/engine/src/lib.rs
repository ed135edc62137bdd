pub mod audit;
pub mod candidates;
pub mod config;
pub mod error;
pub mod scope;

pub use audit::{AssignmentAudit, AuditEntry, AuditOutcome, AuditRecorder};
pub use candidates::assemble_candidates;
pub use config::EngineConfig;
pub use error::EngineError;
pub use scope::resolve_scope;

use landreg_core::{
    AssignResponse, AssignmentRequest, AuthorityId, Conflict, HolderId, ParcelId, SlotConflict,
    detect_conflicts,
    identity::{PublicKey, ServiceIdentity},
    reconcile::{ParcelPatch, reconcile},
};
use landreg_storage::{AuditLog, HolderDirectory, ParcelStore, SlotUpdate, SqliteStorage};

/// Result of an assignment that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignOutcome {
    Applied(AppliedAssignment),
    /// Nothing was written; re-submit with `force` to override.
    Conflicts(Vec<Conflict>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAssignment {
    pub target: HolderId,
    pub target_name: String,
    pub owned: usize,
    pub cultivated: usize,
    /// Empty when the store already matched the desired state.
    pub patches: Vec<ParcelPatch>,
}

impl AppliedAssignment {
    pub fn change_count(&self) -> usize {
        self.patches.iter().map(ParcelPatch::change_count).sum()
    }

    pub fn message(&self) -> String {
        format!(
            "{} now owns {} and cultivates {} parcel(s) in scope ({} slot change(s))",
            self.target_name,
            self.owned,
            self.cultivated,
            self.change_count()
        )
    }
}

/// The assignment service. Stateless between calls apart from the store it
/// writes to; calls on one engine are applied in submission order.
pub struct Engine {
    identity: ServiceIdentity,
    storage: SqliteStorage,
    audit: AuditRecorder,
}

impl Engine {
    pub fn new(identity: ServiceIdentity, storage: SqliteStorage) -> Self {
        let config = EngineConfig::default();
        Self {
            identity,
            storage,
            audit: AuditRecorder::new(config.audit_category, config.audit_enabled),
        }
    }

    pub fn open(config: &EngineConfig, identity: ServiceIdentity) -> Result<Self, EngineError> {
        let storage = match &config.database_path {
            Some(path) => SqliteStorage::open_with_busy_timeout(path, config.busy_timeout())?,
            None => SqliteStorage::open_in_memory()?,
        };
        Ok(Self {
            identity,
            storage,
            audit: AuditRecorder::new(config.audit_category.clone(), config.audit_enabled),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    /// Make `request.target`'s slots within the actor's scope match the
    /// desired sets exactly. Every attempt is audited, whatever its outcome.
    pub fn assign(&mut self, request: &AssignmentRequest) -> AssignResponse {
        match self.execute(request) {
            Ok(AssignOutcome::Applied(applied)) => AssignResponse::Success {
                message: applied.message(),
            },
            Ok(AssignOutcome::Conflicts(conflicts)) => AssignResponse::Conflicts { conflicts },
            Err(err) => AssignResponse::Failure {
                error: err.to_string(),
            },
        }
    }

    /// Positional form of [`Engine::assign`].
    pub fn assign_parts(
        &mut self,
        target: HolderId,
        desired_owned: Vec<ParcelId>,
        desired_cultivated: Vec<ParcelId>,
        actor: AuthorityId,
        force: bool,
    ) -> AssignResponse {
        let mut request = AssignmentRequest::new(target, actor)
            .owning(desired_owned)
            .cultivating(desired_cultivated);
        request.force = force;
        self.assign(&request)
    }

    /// Like [`Engine::assign`] but with the typed outcome.
    pub fn execute(&mut self, request: &AssignmentRequest) -> Result<AssignOutcome, EngineError> {
        let result = run_assignment(&mut self.storage, request);
        match &result {
            Ok(AssignOutcome::Applied(applied)) => tracing::info!(
                target_holder = %request.target,
                actor = %request.actor,
                force = request.force,
                changes = applied.change_count(),
                "assignment applied"
            ),
            Ok(AssignOutcome::Conflicts(conflicts)) => tracing::info!(
                target_holder = %request.target,
                actor = %request.actor,
                conflicts = conflicts.len(),
                "assignment blocked by conflicts"
            ),
            Err(err) if err.is_rejection() => tracing::info!(
                target_holder = %request.target,
                actor = %request.actor,
                error = %err,
                "assignment rejected"
            ),
            Err(err) => tracing::warn!(
                target_holder = %request.target,
                actor = %request.actor,
                error = %err,
                "assignment failed"
            ),
        }
        self.record_audit(request, &result);
        result
    }

    /// Audit failures are logged and swallowed; they never change the outcome.
    fn record_audit(&mut self, request: &AssignmentRequest, result: &Result<AssignOutcome, EngineError>) {
        let outcome = match result {
            Ok(AssignOutcome::Applied(applied)) => AuditOutcome::Applied {
                changes: applied.change_count(),
                parcels: applied.patches.iter().map(|p| p.parcel_id.clone()).collect(),
            },
            Ok(AssignOutcome::Conflicts(conflicts)) => AuditOutcome::Conflicts {
                conflicts: conflicts.iter().map(Into::into).collect(),
            },
            Err(err) if err.is_rejection() => AuditOutcome::Rejected {
                reason: err.to_string(),
            },
            Err(err) => AuditOutcome::Failed {
                reason: err.to_string(),
            },
        };
        let details = AssignmentAudit::new(request, outcome);
        if let Err(err) = self
            .audit
            .record(&mut self.storage, &self.identity, &request.actor, &details)
        {
            tracing::warn!(
                actor = %request.actor,
                action = details.outcome.action(),
                error = %err,
                "audit append failed"
            );
        }
    }

    pub fn audit_trail(&self) -> Result<Vec<AuditEntry>, EngineError> {
        self.storage
            .audit_entries()?
            .iter()
            .map(audit::decode_entry)
            .collect()
    }

    /// Re-hash and check the signature of every audit entry.
    pub fn verify_audit_chain(&self) -> Result<usize, EngineError> {
        audit::verify_chain(&self.storage.audit_entries()?)
    }
}

/// Scope, candidates, conflicts and writes, all inside one IMMEDIATE
/// transaction. Any early return drops the transaction, which rolls back.
fn run_assignment(
    storage: &mut SqliteStorage,
    request: &AssignmentRequest,
) -> Result<AssignOutcome, EngineError> {
    let mut tx = storage.begin_assignment()?;

    let scope = resolve_scope(&tx, &request.actor)?;
    let target_name = tx
        .get_display_name(&request.target)?
        .ok_or_else(|| EngineError::HolderNotFound(request.target.clone()))?;
    let candidates = assemble_candidates(&tx, &scope, request)?;

    if !request.force {
        let conflicts = detect_conflicts(&candidates, request);
        if !conflicts.is_empty() {
            return Ok(AssignOutcome::Conflicts(describe_conflicts(
                &tx,
                conflicts,
                &request.target,
                &target_name,
            )?));
        }
    }

    let patches = reconcile(&candidates, request);
    for patch in &patches {
        tx.update_parcel_slots(&patch.parcel_id, &SlotUpdate::from(patch))?;
    }
    tx.commit()?;

    Ok(AssignOutcome::Applied(AppliedAssignment {
        target: request.target.clone(),
        target_name,
        owned: request.desired_owned.len(),
        cultivated: request.desired_cultivated.len(),
        patches,
    }))
}

fn describe_conflicts<D>(
    holders: &D,
    conflicts: Vec<SlotConflict>,
    target: &HolderId,
    target_name: &str,
) -> Result<Vec<Conflict>, EngineError>
where
    D: HolderDirectory + ?Sized,
{
    conflicts
        .into_iter()
        .map(|c| -> Result<Conflict, EngineError> {
            let incumbent_holder_name = holders
                .get_display_name(&c.incumbent)?
                .unwrap_or_else(|| c.incumbent.to_string());
            Ok(Conflict {
                parcel_id: c.parcel_id,
                village: c.village,
                slot: c.slot,
                incumbent_holder_id: c.incumbent,
                incumbent_holder_name,
                target_holder_id: target.clone(),
                target_holder_name: target_name.to_string(),
            })
        })
        .collect()
}
