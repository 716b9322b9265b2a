use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use hsync_core::{HospitalId, PatientId, PrescriptionId, StaffId};
use hsync_inventory::{InventoryItem, InventoryKey, MedicineName, StockShortfall};
use hsync_prescriptions::{AccessCode, DispensePlan, Prescription};

/// Storage-level failures.
///
/// None of these are business outcomes: a missing prescription is `Ok(None)`
/// and a stock shortfall is reported through [`Debit`] / [`DispenseCommit`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable, pool closed, lock poisoned, transaction aborted.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness rule was violated (duplicate id or live access code).
    #[error("storage conflict: {0}")]
    Conflict(String),

    /// A stored record no longer satisfies domain validation.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Outcome of a single conditional stock decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Debit {
    Applied { remaining: i64 },
    Insufficient(StockShortfall),
}

/// One inventory line as it was debited by a committed redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispensedLine {
    pub medicine: MedicineName,
    pub quantity: i64,
    pub remaining: i64,
}

/// Outcome of an atomic redemption commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispenseCommit {
    /// Prescription claimed and every debit applied.
    Committed { lines: Vec<DispensedLine> },

    /// The prescription is no longer bound to this code and hospital, or was
    /// already dispensed. Nothing changed.
    ClaimLost,

    /// A line could not be covered. Nothing changed.
    Shortfall {
        medicine: MedicineName,
        shortfall: StockShortfall,
    },
}

/// One privacy audit row: a staff member looked at a patient's prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessLogEntry {
    pub viewer_id: StaffId,
    pub patient_id: PatientId,
    pub record_id: PrescriptionId,
    pub reason: String,
    pub viewed_at: DateTime<Utc>,
}

/// Prescription persistence.
#[async_trait::async_trait]
pub trait PrescriptionStore: Send + Sync {
    /// Persist a freshly issued prescription.
    ///
    /// Returns `StoreError::Conflict` when the id or the live access code is
    /// already taken.
    async fn insert(&self, prescription: &Prescription) -> Result<(), StoreError>;

    async fn get(&self, id: PrescriptionId) -> Result<Option<Prescription>, StoreError>;

    /// Exact lookup of an undispensed prescription by live code and owning
    /// hospital. A code owned by another hospital behaves like an unknown code.
    async fn find_by_access_code_and_hospital(
        &self,
        access_code: &AccessCode,
        hospital_id: HospitalId,
    ) -> Result<Option<Prescription>, StoreError>;

    /// Conditional finalization: only succeeds while the prescription is still
    /// undispensed. Returns whether this call performed the transition.
    async fn mark_dispensed(
        &self,
        id: PrescriptionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Per-hospital medicine stock.
#[async_trait::async_trait]
pub trait InventoryStore: Send + Sync {
    /// Insert or replace the stock line for `item.key()`.
    async fn upsert(&self, item: &InventoryItem) -> Result<(), StoreError>;

    async fn get_item(&self, key: &InventoryKey) -> Result<Option<InventoryItem>, StoreError>;

    /// All lines for a hospital, ordered by medicine name.
    async fn list(&self, hospital_id: HospitalId) -> Result<Vec<InventoryItem>, StoreError>;

    /// Lines at or below their reorder threshold, ordered by medicine name.
    async fn low_stock(&self, hospital_id: HospitalId) -> Result<Vec<InventoryItem>, StoreError>;

    /// Atomic conditional decrement: applies iff `stock >= amount`.
    ///
    /// A missing line is reported as insufficient with zero available.
    async fn try_decrement(&self, key: &InventoryKey, amount: i64) -> Result<Debit, StoreError>;
}

/// The redemption commit.
#[async_trait::async_trait]
pub trait DispenseLedger: Send + Sync {
    /// Atomically claim the prescription named by `plan` and apply every
    /// planned debit, or change nothing at all.
    async fn commit_dispense(
        &self,
        plan: &DispensePlan,
        at: DateTime<Utc>,
    ) -> Result<DispenseCommit, StoreError>;
}

/// Append-only record of who viewed which prescription.
#[async_trait::async_trait]
pub trait AccessLogStore: Send + Sync {
    async fn record_access(&self, entry: &AccessLogEntry) -> Result<(), StoreError>;

    /// Entries for one prescription, oldest first.
    async fn access_log(&self, record_id: PrescriptionId) -> Result<Vec<AccessLogEntry>, StoreError>;
}

/// Everything the pharmacy workflows need from a backend.
pub trait PharmacyStore: PrescriptionStore + InventoryStore + DispenseLedger + AccessLogStore {}

impl<T> PharmacyStore for T where
    T: PrescriptionStore + InventoryStore + DispenseLedger + AccessLogStore
{
}
