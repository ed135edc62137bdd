use landreg_core::{
    AssignResponse, AssignmentRequest, AuthorityId, HolderId, Parcel, ParcelId,
    identity::ServiceIdentity,
};
use landreg_engine::Engine;
use landreg_storage::{SqliteStorage, StorageError};

pub fn pid(s: &str) -> ParcelId {
    ParcelId::new(s).expect("valid parcel id")
}

pub fn hid(s: &str) -> HolderId {
    HolderId::new(s).expect("valid holder id")
}

pub fn aid(s: &str) -> AuthorityId {
    AuthorityId::new(s).expect("valid authority id")
}

/// An engine over an in-memory registry, with seeding helpers standing in
/// for the CRUD screens that normally create holders, mayors and parcels.
pub struct TestRegistry {
    pub engine: Engine,
}

impl TestRegistry {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::from_engine(Engine::new(
            ServiceIdentity::generate(),
            SqliteStorage::open_in_memory()?,
        )))
    }

    pub fn from_engine(engine: Engine) -> Self {
        Self { engine }
    }

    /// Two authorities, three holders:
    /// - M1 manages Valea and Deal, M2 manages Livada.
    /// - F1 Ion Popescu, F2 Maria Ionescu, F3 Elena Dumitru.
    pub fn two_mayors() -> Result<Self, Box<dyn std::error::Error>> {
        let mut registry = Self::new()?;
        registry.holder("F1", "Ion Popescu")?;
        registry.holder("F2", "Maria Ionescu")?;
        registry.holder("F3", "Elena Dumitru")?;
        registry.authority("M1", &["Valea", "Deal"])?;
        registry.authority("M2", &["Livada"])?;
        Ok(registry)
    }

    pub fn holder(&mut self, id: &str, display_name: &str) -> Result<HolderId, StorageError> {
        let holder_id = HolderId::new(id)?;
        self.engine.storage().insert_holder(&holder_id, display_name)?;
        Ok(holder_id)
    }

    pub fn authority(&mut self, id: &str, villages: &[&str]) -> Result<AuthorityId, StorageError> {
        let authority_id = AuthorityId::new(id)?;
        self.engine
            .storage_mut()
            .insert_authority(&authority_id, &format!("Primaria {id}"), villages)?;
        Ok(authority_id)
    }

    /// Insert a parcel with the given slot occupants.
    pub fn parcel(
        &mut self,
        id: &str,
        village: &str,
        owner: Option<&str>,
        cultivator: Option<&str>,
    ) -> Result<ParcelId, StorageError> {
        let parcel = Parcel::new(ParcelId::new(id)?, village, 1.5)?
            .with_boundary(vec![(45.0, 24.0), (45.0, 24.01), (45.01, 24.01)])
            .with_owner(owner.map(HolderId::new).transpose()?)
            .with_cultivator(cultivator.map(HolderId::new).transpose()?);
        self.engine.storage().insert_parcel(&parcel)?;
        Ok(parcel.id)
    }

    pub fn get(&self, id: &str) -> Result<Parcel, StorageError> {
        self.engine
            .storage()
            .get_parcel(&ParcelId::new(id)?)?
            .ok_or_else(|| StorageError::NotFound(format!("parcel {id}")))
    }

    /// (owner, cultivator) of a parcel as plain strings.
    pub fn slots(&self, id: &str) -> Result<(Option<String>, Option<String>), StorageError> {
        let parcel = self.get(id)?;
        Ok((
            parcel.owner.map(|h| h.as_str().to_string()),
            parcel.cultivator.map(|h| h.as_str().to_string()),
        ))
    }

    pub fn all_parcels(&self) -> Result<Vec<Parcel>, StorageError> {
        self.engine.storage().list_parcels()
    }

    pub fn assign(
        &mut self,
        target: &str,
        actor: &str,
        owned: &[&str],
        cultivated: &[&str],
        force: bool,
    ) -> AssignResponse {
        let mut request = AssignmentRequest::new(hid(target), aid(actor))
            .owning(owned.iter().map(|p| pid(p)))
            .cultivating(cultivated.iter().map(|p| pid(p)));
        request.force = force;
        self.engine.assign(&request)
    }
}
