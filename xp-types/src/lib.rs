//! Shared data model: the XRD/Composition/Usage/ActivationPolicy kinds
//! that are known at compile time, plus the generic field-path-addressable
//! representation used for composite, claim and composed-resource objects
//! whose kinds are not (§3, §3.1).

pub mod activation_policy;
pub mod composition;
pub mod conditions;
pub mod dynamic;
pub mod fieldpath;
pub mod refs;
pub mod usage;
pub mod xrd;

pub use activation_policy::{ActivationPolicySpec, ActivationPolicyStatus, ManagedResourceActivationPolicy};
pub use composition::{Composition, CompositionMode, CompositionSpec, CompositionStatus};
pub use conditions::{Condition, ConditionStatus, ConditionType, Conditions};
pub use dynamic::{Claim, Composite};
pub use fieldpath::{FieldPath, FieldPathError};
pub use usage::{Usage, UsageSpec, UsageStatus, UsageTarget};
pub use xrd::{CompositeResourceDefinition, CompositeResourceDefinitionSpec, CompositeResourceDefinitionStatus};
