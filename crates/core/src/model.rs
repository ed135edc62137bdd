use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{AuthorityId, HolderId, ParcelId};

/// (latitude, longitude) in decimal degrees.
pub type Coordinate = (f64, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Owner,
    Cultivator,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Owner, Slot::Cultivator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Cultivator => "cultivator",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "owner" => Ok(Self::Owner),
            "cultivator" => Ok(Self::Cultivator),
            _ => Err(CoreError::InvalidData(format!("unknown slot: {s}"))),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cadastral parcel with its two independent assignment slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub id: ParcelId,
    pub village: String,
    /// Hectares, strictly positive.
    pub area: f64,
    pub boundary: Vec<Coordinate>,
    pub owner: Option<HolderId>,
    pub cultivator: Option<HolderId>,
}

impl Parcel {
    pub fn new(id: ParcelId, village: impl Into<String>, area: f64) -> Result<Self, CoreError> {
        if !area.is_finite() || area <= 0.0 {
            return Err(CoreError::InvalidData(format!(
                "parcel {id} has non-positive area {area}"
            )));
        }
        Ok(Self {
            id,
            village: village.into(),
            area,
            boundary: Vec::new(),
            owner: None,
            cultivator: None,
        })
    }

    pub fn with_boundary(mut self, boundary: Vec<Coordinate>) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_owner(mut self, owner: Option<HolderId>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_cultivator(mut self, cultivator: Option<HolderId>) -> Self {
        self.cultivator = cultivator;
        self
    }

    pub fn slot(&self, slot: Slot) -> Option<&HolderId> {
        match slot {
            Slot::Owner => self.owner.as_ref(),
            Slot::Cultivator => self.cultivator.as_ref(),
        }
    }

    pub fn set_slot(&mut self, slot: Slot, holder: Option<HolderId>) {
        match slot {
            Slot::Owner => self.owner = holder,
            Slot::Cultivator => self.cultivator = holder,
        }
    }
}

/// Villages an authority may act upon for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scope {
    villages: BTreeSet<String>,
}

impl Scope {
    pub fn new<I, S>(villages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            villages: villages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, village: &str) -> bool {
        self.villages.contains(village)
    }

    pub fn is_empty(&self) -> bool {
        self.villages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.villages.len()
    }

    pub fn villages(&self) -> impl Iterator<Item = &str> {
        self.villages.iter().map(String::as_str)
    }
}

/// One invocation of the assignment operation. The desired sets are the
/// complete state for `target` within the actor's scope, not a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub target: HolderId,
    pub desired_owned: BTreeSet<ParcelId>,
    pub desired_cultivated: BTreeSet<ParcelId>,
    pub actor: AuthorityId,
    pub force: bool,
}

impl AssignmentRequest {
    pub fn new(target: HolderId, actor: AuthorityId) -> Self {
        Self {
            target,
            desired_owned: BTreeSet::new(),
            desired_cultivated: BTreeSet::new(),
            actor,
            force: false,
        }
    }

    pub fn owning(mut self, parcels: impl IntoIterator<Item = ParcelId>) -> Self {
        self.desired_owned.extend(parcels);
        self
    }

    pub fn cultivating(mut self, parcels: impl IntoIterator<Item = ParcelId>) -> Self {
        self.desired_cultivated.extend(parcels);
        self
    }

    /// Same request with conflicting incumbents overridden.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn desired(&self, slot: Slot) -> &BTreeSet<ParcelId> {
        match slot {
            Slot::Owner => &self.desired_owned,
            Slot::Cultivator => &self.desired_cultivated,
        }
    }

    /// Every parcel named by the payload, in either desired set.
    pub fn referenced_parcels(&self) -> BTreeSet<&ParcelId> {
        self.desired_owned
            .iter()
            .chain(self.desired_cultivated.iter())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub parcel_id: ParcelId,
    pub village: String,
    pub slot: Slot,
    pub incumbent_holder_id: HolderId,
    pub incumbent_holder_name: String,
    pub target_holder_id: HolderId,
    pub target_holder_name: String,
}

/// What the caller of `assign` gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssignResponse {
    Success { message: String },
    Conflicts { conflicts: Vec<Conflict> },
    Failure { error: String },
}

impl AssignResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn conflicts(&self) -> Option<&[Conflict]> {
        match self {
            Self::Conflicts { conflicts } => Some(conflicts),
            _ => None,
        }
    }
}
