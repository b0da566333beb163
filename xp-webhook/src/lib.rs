//! The Usage admission index and HTTP admission hook (§4.H).

pub mod admission;
pub mod index;

pub use admission::{router, AdmissionError, AdmissionState};
pub use index::{run_refresher, UsageEntry, UsageIndex};
