//! Detection of desired slot assignments that would displace another holder.

use crate::ids::{HolderId, ParcelId};
use crate::model::{AssignmentRequest, Parcel, Slot};

/// A conflict before display names are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotConflict {
    pub parcel_id: ParcelId,
    pub village: String,
    pub slot: Slot,
    pub incumbent: HolderId,
}

/// Compare the desired sets of `request` with the current slots of the
/// candidate parcels.
///
/// A slot conflicts when the parcel is desired for that slot and the slot is
/// held by someone other than the target. An incumbent who both owns and
/// cultivates a parcel that the target is taking as owner has a single claim,
/// reported on the owner slot only.
///
/// Output is ordered by parcel id, owner before cultivator.
pub fn detect_conflicts(candidates: &[Parcel], request: &AssignmentRequest) -> Vec<SlotConflict> {
    let mut conflicts = Vec::new();
    let target = &request.target;

    for parcel in candidates {
        for slot in Slot::ALL {
            if !request.desired(slot).contains(&parcel.id) {
                continue;
            }
            let Some(incumbent) = parcel.slot(slot) else {
                continue;
            };
            if incumbent == target {
                continue;
            }
            if slot == Slot::Cultivator
                && request.desired_owned.contains(&parcel.id)
                && parcel.owner.as_ref() == Some(incumbent)
            {
                continue;
            }
            conflicts.push(SlotConflict {
                parcel_id: parcel.id.clone(),
                village: parcel.village.clone(),
                slot,
                incumbent: incumbent.clone(),
            });
        }
    }

    conflicts.sort_by(|a, b| (&a.parcel_id, a.slot).cmp(&(&b.parcel_id, b.slot)));
    conflicts
}
