use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use hsync_core::{HospitalId, PrescriptionId};
use hsync_inventory::{InventoryItem, InventoryKey, StockShortfall};
use hsync_prescriptions::{AccessCode, DispensePlan, Prescription};

use super::r#trait::{
    AccessLogEntry, AccessLogStore, Debit, DispenseCommit, DispenseLedger, DispensedLine, InventoryStore, PrescriptionStore,
    StoreError,
};

#[derive(Debug, Default)]
struct State {
    prescriptions: HashMap<PrescriptionId, Prescription>,
    /// Live access code -> owning prescription. Entries are removed on dispense.
    active_codes: HashMap<AccessCode, PrescriptionId>,
    inventory: BTreeMap<InventoryKey, InventoryItem>,
    access_log: Vec<AccessLogEntry>,
}

/// In-memory pharmacy store.
///
/// Intended for tests/dev. A single mutex guards prescriptions and inventory
/// together, so a redemption commit is trivially atomic and isolated.
#[derive(Debug, Default)]
pub struct InMemoryPharmacyStore {
    state: Mutex<State>,
}

impl InMemoryPharmacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    /// Total units on hand for a hospital, summed over every line.
    pub fn total_stock(&self, hospital_id: HospitalId) -> Result<i64, StoreError> {
        let state = self.lock()?;
        Ok(state
            .inventory
            .values()
            .filter(|item| item.hospital_id() == hospital_id)
            .map(InventoryItem::stock)
            .sum())
    }
}

fn hospital_items(
    state: &State,
    hospital_id: HospitalId,
    keep: impl Fn(&InventoryItem) -> bool,
) -> Vec<InventoryItem> {
    // BTreeMap order is (hospital, medicine), so lines come out sorted by name.
    state
        .inventory
        .values()
        .filter(|item| item.hospital_id() == hospital_id && keep(*item))
        .cloned()
        .collect()
}

#[async_trait::async_trait]
impl PrescriptionStore for InMemoryPharmacyStore {
    async fn insert(&self, prescription: &Prescription) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let id = prescription.id_typed();

        if state.prescriptions.contains_key(&id) {
            return Err(StoreError::Conflict(format!("prescription {id} already exists")));
        }
        if let Some(code) = prescription.access_code() {
            if state.active_codes.contains_key(code) {
                return Err(StoreError::Conflict("access code already in use".to_string()));
            }
            state.active_codes.insert(code.clone(), id);
        }
        state.prescriptions.insert(id, prescription.clone());
        Ok(())
    }

    async fn get(&self, id: PrescriptionId) -> Result<Option<Prescription>, StoreError> {
        let state = self.lock()?;
        Ok(state.prescriptions.get(&id).cloned())
    }

    async fn find_by_access_code_and_hospital(
        &self,
        access_code: &AccessCode,
        hospital_id: HospitalId,
    ) -> Result<Option<Prescription>, StoreError> {
        let state = self.lock()?;
        let found = state
            .active_codes
            .get(access_code)
            .and_then(|id| state.prescriptions.get(id))
            .filter(|p| p.is_bound_to(access_code, hospital_id))
            .cloned();
        Ok(found)
    }

    async fn mark_dispensed(
        &self,
        id: PrescriptionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let State {
            prescriptions,
            active_codes,
            ..
        } = &mut *state;

        let Some(prescription) = prescriptions.get_mut(&id) else {
            return Ok(false);
        };
        let Some(code) = prescription.access_code().cloned() else {
            return Ok(false);
        };
        prescription
            .mark_dispensed(at)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        active_codes.remove(&code);
        Ok(true)
    }
}

#[async_trait::async_trait]
impl InventoryStore for InMemoryPharmacyStore {
    async fn upsert(&self, item: &InventoryItem) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.inventory.insert(item.key().clone(), item.clone());
        Ok(())
    }

    async fn get_item(&self, key: &InventoryKey) -> Result<Option<InventoryItem>, StoreError> {
        let state = self.lock()?;
        Ok(state.inventory.get(key).cloned())
    }

    async fn list(&self, hospital_id: HospitalId) -> Result<Vec<InventoryItem>, StoreError> {
        let state = self.lock()?;
        Ok(hospital_items(&state, hospital_id, |_| true))
    }

    async fn low_stock(&self, hospital_id: HospitalId) -> Result<Vec<InventoryItem>, StoreError> {
        let state = self.lock()?;
        Ok(hospital_items(&state, hospital_id, InventoryItem::needs_reorder))
    }

    async fn try_decrement(&self, key: &InventoryKey, amount: i64) -> Result<Debit, StoreError> {
        let mut state = self.lock()?;
        let Some(item) = state.inventory.get_mut(key) else {
            return Ok(Debit::Insufficient(StockShortfall {
                required: amount,
                available: 0,
            }));
        };
        Ok(match item.debit(amount) {
            Ok(remaining) => Debit::Applied { remaining },
            Err(shortfall) => Debit::Insufficient(shortfall),
        })
    }
}

#[async_trait::async_trait]
impl DispenseLedger for InMemoryPharmacyStore {
    async fn commit_dispense(
        &self,
        plan: &DispensePlan,
        at: DateTime<Utc>,
    ) -> Result<DispenseCommit, StoreError> {
        let mut state = self.lock()?;
        let State {
            prescriptions,
            active_codes,
            inventory,
            ..
        } = &mut *state;

        let Some(prescription) = prescriptions.get_mut(&plan.prescription_id) else {
            return Ok(DispenseCommit::ClaimLost);
        };
        if !prescription.is_bound_to(&plan.access_code, plan.hospital_id) {
            return Ok(DispenseCommit::ClaimLost);
        }

        // Check every line before touching anything.
        for line in &plan.lines {
            let available = inventory
                .get(&plan.key_for(line))
                .map(InventoryItem::stock)
                .unwrap_or(0);
            if available < line.quantity {
                return Ok(DispenseCommit::Shortfall {
                    medicine: line.medicine.clone(),
                    shortfall: StockShortfall {
                        required: line.quantity,
                        available,
                    },
                });
            }
        }

        let mut lines = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            let item = inventory.get_mut(&plan.key_for(line)).ok_or_else(|| {
                StoreError::Corrupt(format!("inventory line {} vanished", line.medicine))
            })?;
            let remaining = item
                .debit(line.quantity)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            lines.push(DispensedLine {
                medicine: line.medicine.clone(),
                quantity: line.quantity,
                remaining,
            });
        }

        prescription
            .mark_dispensed(at)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        active_codes.remove(&plan.access_code);

        Ok(DispenseCommit::Committed { lines })
    }
}

#[async_trait::async_trait]
impl AccessLogStore for InMemoryPharmacyStore {
    async fn record_access(&self, entry: &AccessLogEntry) -> Result<(), StoreError> {
        self.lock()?.access_log.push(entry.clone());
        Ok(())
    }

    async fn access_log(&self, record_id: PrescriptionId) -> Result<Vec<AccessLogEntry>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .access_log
            .iter()
            .filter(|entry| entry.record_id == record_id)
            .cloned()
            .collect())
    }
}
