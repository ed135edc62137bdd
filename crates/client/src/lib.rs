pub mod controller;
pub mod error;
pub mod gateway;
pub mod view;

pub use controller::{ConflictPrompt, ControllerState, OptimisticController, RollbackReason};
pub use error::ClientError;
pub use gateway::{AssignmentGateway, TransportError};
pub use view::{AssignmentView, ParcelView, Selection};
