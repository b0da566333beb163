//! The composite and claim reconcilers, the XRD definition/publication
//! state machines, and the dynamic controller engine (§4.C-G).

pub mod claim;
pub mod composite;
pub mod definition;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod publication;
pub mod selection;

pub use claim::ClaimReconciler;
pub use composite::CompositeReconciler;
pub use definition::DefinitionReconciler;
pub use engine::{Cancellation, ControllerEngine};
pub use error::{ControllerError, Result};
pub use publication::PublicationReconciler;
pub use selection::{select_composition, CompositionCandidate};
