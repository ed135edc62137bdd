use std::collections::{BTreeMap, BTreeSet};

use landreg_core::{AssignmentRequest, Parcel, ParcelId, Scope};
use landreg_storage::ParcelStore;

use crate::error::EngineError;

/// Every in-scope parcel the request can touch: the parcels it names plus
/// the ones the target already holds, which are released if not named again.
///
/// Fails wholesale if any named parcel is unknown or outside `scope`.
/// Result is ordered by parcel id.
pub fn assemble_candidates<S>(
    store: &S,
    scope: &Scope,
    request: &AssignmentRequest,
) -> Result<Vec<Parcel>, EngineError>
where
    S: ParcelStore + ?Sized,
{
    let referenced: Vec<&ParcelId> = request.referenced_parcels().into_iter().collect();
    let named: Vec<Parcel> = store
        .find_parcels_by_ids(&referenced, scope)?
        .into_iter()
        .filter(|p| scope.contains(&p.village))
        .collect();

    let invalid: Vec<ParcelId> = {
        let found: BTreeSet<&ParcelId> = named.iter().map(|p| &p.id).collect();
        referenced
            .iter()
            .filter(|id| !found.contains(*id))
            .map(|id| (*id).clone())
            .collect()
    };
    if !invalid.is_empty() {
        return Err(EngineError::InvalidParcelReference(invalid));
    }

    let held = store.find_parcels_by_holder_in_villages(&request.target, scope)?;

    let mut candidates: BTreeMap<ParcelId, Parcel> =
        named.into_iter().map(|p| (p.id.clone(), p)).collect();
    for parcel in held.into_iter().filter(|p| scope.contains(&p.village)) {
        candidates.entry(parcel.id.clone()).or_insert(parcel);
    }
    Ok(candidates.into_values().collect())
}
