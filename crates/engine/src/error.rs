use landreg_core::{AuthorityId, CoreError, HolderId, ParcelId};
use landreg_storage::StorageError;
use thiserror::Error;

fn join_ids(ids: &[ParcelId]) -> String {
    ids.iter()
        .map(ParcelId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("authority not found: {0}")]
    AuthorityNotFound(AuthorityId),

    #[error("authority {0} has no jurisdiction over any village")]
    NoJurisdiction(AuthorityId),

    #[error("holder not found: {0}")]
    HolderNotFound(HolderId),

    #[error("invalid parcel reference: {}", join_ids(.0))]
    InvalidParcelReference(Vec<ParcelId>),

    #[error("could not save the assignment, please retry: {0}")]
    Persistence(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("audit chain broken at entry {seq}: {reason}")]
    AuditChainBroken { seq: i64, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Authorization and validation failures: the request itself was wrong,
    /// the store was never written.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AuthorityNotFound(_)
                | Self::NoJurisdiction(_)
                | Self::HolderNotFound(_)
                | Self::InvalidParcelReference(_)
        )
    }
}
