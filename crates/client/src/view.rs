use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use landreg_core::{
    AssignmentRequest, AuthorityId, HolderId, Parcel, ParcelId, Slot, reconcile::plan_slot,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelView {
    pub id: ParcelId,
    pub village: String,
    pub area: f64,
    pub owner: Option<HolderId>,
    pub cultivator: Option<HolderId>,
}

impl ParcelView {
    pub fn slot(&self, slot: Slot) -> Option<&HolderId> {
        match slot {
            Slot::Owner => self.owner.as_ref(),
            Slot::Cultivator => self.cultivator.as_ref(),
        }
    }

    fn set_slot(&mut self, slot: Slot, holder: Option<HolderId>) {
        match slot {
            Slot::Owner => self.owner = holder,
            Slot::Cultivator => self.cultivator = holder,
        }
    }
}

impl From<&Parcel> for ParcelView {
    fn from(parcel: &Parcel) -> Self {
        Self {
            id: parcel.id.clone(),
            village: parcel.village.clone(),
            area: parcel.area,
            owner: parcel.owner.clone(),
            cultivator: parcel.cultivator.clone(),
        }
    }
}

/// Parcels ticked by the operator for each slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub owned: BTreeSet<ParcelId>,
    pub cultivated: BTreeSet<ParcelId>,
}

impl Selection {
    pub fn get(&self, slot: Slot) -> &BTreeSet<ParcelId> {
        match slot {
            Slot::Owner => &self.owned,
            Slot::Cultivator => &self.cultivated,
        }
    }

    /// Flip one parcel in or out of a slot's selection; returns whether it is
    /// selected afterwards.
    pub fn toggle(&mut self, slot: Slot, parcel_id: ParcelId) -> bool {
        let set = match slot {
            Slot::Owner => &mut self.owned,
            Slot::Cultivator => &mut self.cultivated,
        };
        if set.remove(&parcel_id) {
            false
        } else {
            set.insert(parcel_id);
            true
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty() && self.cultivated.is_empty()
    }
}

/// Everything the assignment panel shows for one target holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentView {
    pub target: HolderId,
    pub actor: AuthorityId,
    pub parcels: BTreeMap<ParcelId, ParcelView>,
    pub selection: Selection,
}

impl AssignmentView {
    /// Selection starts out as the target's current holdings.
    pub fn new<'a>(
        target: HolderId,
        actor: AuthorityId,
        parcels: impl IntoIterator<Item = &'a Parcel>,
    ) -> Self {
        let mut selection = Selection::default();
        let parcels: BTreeMap<ParcelId, ParcelView> = parcels
            .into_iter()
            .map(|p| (p.id.clone(), ParcelView::from(p)))
            .collect();
        for parcel in parcels.values() {
            if parcel.owner.as_ref() == Some(&target) {
                selection.owned.insert(parcel.id.clone());
            }
            if parcel.cultivator.as_ref() == Some(&target) {
                selection.cultivated.insert(parcel.id.clone());
            }
        }
        Self {
            target,
            actor,
            parcels,
            selection,
        }
    }

    pub fn request(&self, force: bool) -> AssignmentRequest {
        let mut request = AssignmentRequest::new(self.target.clone(), self.actor.clone())
            .owning(self.selection.owned.iter().cloned())
            .cultivating(self.selection.cultivated.iter().cloned());
        request.force = force;
        request
    }

    /// Show the desired end state before the service confirms it, using the
    /// same per-slot plan the service applies, then clear the selection.
    pub fn apply_optimistic(&mut self) {
        let target = self.target.clone();
        for parcel in self.parcels.values_mut() {
            for slot in Slot::ALL {
                let desired = self.selection.get(slot).contains(&parcel.id);
                if plan_slot(parcel.slot(slot), desired, &target).is_some() {
                    let value = desired.then(|| target.clone());
                    parcel.set_slot(slot, value);
                }
            }
        }
        self.selection = Selection::default();
    }
}
