use landreg_core::{AuthorityId, Scope};
use landreg_storage::AuthorityDirectory;

use crate::error::EngineError;

/// Villages `actor` may act upon. An authority that manages nothing has no
/// jurisdiction at all, even if it once did.
pub fn resolve_scope<D>(directory: &D, actor: &AuthorityId) -> Result<Scope, EngineError>
where
    D: AuthorityDirectory + ?Sized,
{
    let villages = directory
        .get_managed_villages(actor)?
        .ok_or_else(|| EngineError::AuthorityNotFound(actor.clone()))?;
    let scope = Scope::new(villages);
    if scope.is_empty() {
        return Err(EngineError::NoJurisdiction(actor.clone()));
    }
    tracing::debug!(actor = %actor, villages = scope.len(), "scope resolved");
    Ok(scope)
}
