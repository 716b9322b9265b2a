//! `hsync-core`: shared domain building blocks.
//!
//! Pure domain primitives only: identifiers and the domain error model.
//! No IO, no storage.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{HospitalId, PatientId, PrescriptionId, StaffId};
