//! # Contracts
//!
//! Frozen interface contracts shared by every publish-engine crate: work item
//! and identifier types, the collaborator traits the engine calls into, the
//! unified error type and the run configuration.
//!
//! Business crates depend on this crate only; reverse dependencies are
//! prohibited.

mod collaborators;
mod config;
mod error;
mod target_id;
mod work_item;

pub use collaborators::*;
pub use config::*;
pub use error::*;
pub use target_id::TargetId;
pub use work_item::*;
