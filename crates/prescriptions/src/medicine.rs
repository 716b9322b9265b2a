use serde::{Deserialize, Serialize};

use hsync_core::{DomainError, DomainResult};
use hsync_inventory::MedicineName;

/// Upper bound on time slots per day in a routine.
pub const MAX_ROUTINE_SLOTS: usize = 24;

/// Ordered per-time-slot dose counts (e.g. morning / afternoon / evening).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DosageRoutine(Vec<u32>);

impl DosageRoutine {
    pub fn new(slots: Vec<u32>) -> DomainResult<Self> {
        if slots.len() > MAX_ROUTINE_SLOTS {
            return Err(DomainError::validation(format!(
                "dosage routine has more than {MAX_ROUTINE_SLOTS} slots"
            )));
        }
        Ok(Self(slots))
    }

    pub fn slots(&self) -> &[u32] {
        &self.0
    }

    /// Doses per day (sum over all slots).
    pub fn daily_doses(&self) -> u64 {
        self.0.iter().map(|&n| u64::from(n)).sum()
    }
}

/// One medicine entry within a prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineLineItem {
    pub name: MedicineName,
    pub routine: DosageRoutine,
    pub days: u32,
}

impl MedicineLineItem {
    pub fn new(name: MedicineName, routine: DosageRoutine, days: u32) -> Self {
        Self { name, routine, days }
    }

    /// Total units needed: `sum(routine) * days`.
    pub fn required_quantity(&self) -> DomainResult<i64> {
        self.routine
            .daily_doses()
            .checked_mul(u64::from(self.days))
            .and_then(|q| i64::try_from(q).ok())
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "required quantity for {} overflows",
                    self.name
                ))
            })
    }

    /// Re-check invariants of a line that arrived through deserialization.
    pub fn validate(&self) -> DomainResult<()> {
        if self.routine.slots().len() > MAX_ROUTINE_SLOTS {
            return Err(DomainError::validation(format!(
                "dosage routine for {} has more than {MAX_ROUTINE_SLOTS} slots",
                self.name
            )));
        }
        self.required_quantity().map(|_| ())
    }
}
