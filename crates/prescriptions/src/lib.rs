//! Prescription domain.
//!
//! A prescription carries the medicines a doctor ordered, each with a dosage
//! routine and a duration, plus a single-use access code the pharmacist redeems
//! exactly once. Everything here is deterministic domain logic; persistence and
//! the redemption workflow live in `hsync-infra`.

pub mod access_code;
pub mod medicine;
pub mod plan;
pub mod prescription;

pub use access_code::{AccessCode, AccessCodeIssuer, AccessCodePolicy, CodeAlphabet};
pub use medicine::{DosageRoutine, MedicineLineItem};
pub use plan::{DispensePlan, PlannedDebit};
pub use prescription::{DispenseState, Prescription, PrescriptionDraft};
