//! Dispense plan: the per-medicine inventory debits a redemption must apply.

use std::collections::BTreeMap;

use hsync_core::{DomainError, DomainResult, HospitalId, PrescriptionId};
use hsync_inventory::{InventoryKey, MedicineName};

use crate::access_code::AccessCode;
use crate::medicine::MedicineLineItem;

/// A single inventory debit keyed by the exact medicine name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDebit {
    pub medicine: MedicineName,
    pub quantity: i64,
}

/// All debits for one prescription, plus what identifies the claim on it.
///
/// Lines are merged per medicine, exclude zero quantities and are ordered by
/// medicine name so every redemption touches inventory rows in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispensePlan {
    pub prescription_id: PrescriptionId,
    pub hospital_id: HospitalId,
    pub access_code: AccessCode,
    pub lines: Vec<PlannedDebit>,
}

impl DispensePlan {
    pub fn build(
        prescription_id: PrescriptionId,
        hospital_id: HospitalId,
        access_code: AccessCode,
        medicines: &[MedicineLineItem],
    ) -> DomainResult<Self> {
        let mut merged: BTreeMap<MedicineName, i64> = BTreeMap::new();
        let mut total: i64 = 0;
        for line in medicines {
            let qty = line.required_quantity()?;
            total = total
                .checked_add(qty)
                .ok_or_else(|| DomainError::validation("total dispensed quantity overflows"))?;
            let slot = merged.entry(line.name.clone()).or_insert(0);
            *slot = slot.checked_add(qty).ok_or_else(|| {
                DomainError::validation(format!(
                    "required quantity for {} overflows",
                    line.name
                ))
            })?;
        }

        let lines = merged
            .into_iter()
            .filter(|(_, quantity)| *quantity > 0)
            .map(|(medicine, quantity)| PlannedDebit { medicine, quantity })
            .collect();

        Ok(Self {
            prescription_id,
            hospital_id,
            access_code,
            lines,
        })
    }

    pub fn key_for(&self, debit: &PlannedDebit) -> InventoryKey {
        InventoryKey::new(self.hospital_id, debit.medicine.clone())
    }

    /// Sum of all debits. `build` rejects plans whose total overflows, so this
    /// only saturates for plans assembled by hand.
    pub fn total_units(&self) -> i64 {
        self.lines
            .iter()
            .fold(0i64, |acc, l| acc.saturating_add(l.quantity))
    }
}
