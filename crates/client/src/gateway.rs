use landreg_core::{AssignResponse, AssignmentRequest};
use landreg_engine::Engine;
use thiserror::Error;

/// The request never produced a service response (connection lost, bad
/// payload, crashed handler).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Whatever carries an assignment request to the service.
pub trait AssignmentGateway {
    fn assign(&mut self, request: &AssignmentRequest) -> Result<AssignResponse, TransportError>;
}

impl AssignmentGateway for Engine {
    fn assign(&mut self, request: &AssignmentRequest) -> Result<AssignResponse, TransportError> {
        Ok(Engine::assign(self, request))
    }
}
