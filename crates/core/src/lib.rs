pub mod conflict;
pub mod error;
pub mod identity;
pub mod ids;
pub mod model;
pub mod reconcile;

pub use conflict::{SlotConflict, detect_conflicts};
pub use error::CoreError;
pub use ids::*;
pub use model::*;
pub use reconcile::{ParcelPatch, SlotAction, reconcile};
