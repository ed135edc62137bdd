//! Diff between the current slots of candidate parcels and the desired state
//! of one holder. Pure: no store access.

use serde::{Deserialize, Serialize};

use crate::ids::{HolderId, ParcelId};
use crate::model::{AssignmentRequest, Parcel, Slot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotAction {
    /// Slot held by the target, no longer desired.
    Clear,
    /// Slot held by someone else, handed to the target.
    ClearThenSet { previous: HolderId },
    /// Empty slot, handed to the target.
    Set,
}

/// Changes for one parcel. A `None` slot action leaves that slot alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelPatch {
    pub parcel_id: ParcelId,
    pub target: HolderId,
    pub owner: Option<SlotAction>,
    pub cultivator: Option<SlotAction>,
}

impl ParcelPatch {
    pub fn action(&self, slot: Slot) -> Option<&SlotAction> {
        match slot {
            Slot::Owner => self.owner.as_ref(),
            Slot::Cultivator => self.cultivator.as_ref(),
        }
    }

    /// Value the slot takes after the patch: `None` if untouched,
    /// `Some(None)` if cleared, `Some(Some(target))` if assigned.
    pub fn new_value(&self, slot: Slot) -> Option<Option<HolderId>> {
        self.action(slot).map(|action| match action {
            SlotAction::Clear => None,
            SlotAction::ClearThenSet { .. } | SlotAction::Set => Some(self.target.clone()),
        })
    }

    pub fn change_count(&self) -> usize {
        Slot::ALL
            .iter()
            .filter(|slot| self.action(**slot).is_some())
            .count()
    }

    pub fn apply_to(&self, parcel: &mut Parcel) {
        for slot in Slot::ALL {
            if let Some(value) = self.new_value(slot) {
                parcel.set_slot(slot, value);
            }
        }
    }
}

pub fn plan_slot(current: Option<&HolderId>, desired: bool, target: &HolderId) -> Option<SlotAction> {
    match (current, desired) {
        (Some(holder), true) if holder == target => None,
        (Some(holder), true) => Some(SlotAction::ClearThenSet {
            previous: holder.clone(),
        }),
        (None, true) => Some(SlotAction::Set),
        (Some(holder), false) if holder == target => Some(SlotAction::Clear),
        // Another holder's slot the request does not claim, or an empty one.
        (_, false) => None,
    }
}

/// Compute the patches that bring the candidate parcels to the desired state
/// of `request.target`. Parcels needing no change produce no patch, so a
/// second run against the resulting state is empty.
pub fn reconcile(candidates: &[Parcel], request: &AssignmentRequest) -> Vec<ParcelPatch> {
    let target = &request.target;
    let mut patches: Vec<ParcelPatch> = candidates
        .iter()
        .filter_map(|parcel| {
            let owner = plan_slot(
                parcel.owner.as_ref(),
                request.desired_owned.contains(&parcel.id),
                target,
            );
            let cultivator = plan_slot(
                parcel.cultivator.as_ref(),
                request.desired_cultivated.contains(&parcel.id),
                target,
            );
            if owner.is_none() && cultivator.is_none() {
                return None;
            }
            Some(ParcelPatch {
                parcel_id: parcel.id.clone(),
                target: target.clone(),
                owner,
                cultivator,
            })
        })
        .collect();

    patches.sort_by(|a, b| a.parcel_id.cmp(&b.parcel_id));
    patches
}
