//! Hivelocity CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Hivelocity machine controller.

/// Status conditions
pub mod conditions;
/// Device selection rules
pub mod device_selector;
/// HivelocityMachine resource
pub mod hivelocity_machine;

pub use conditions::*;
pub use device_selector::*;
pub use hivelocity_machine::*;
