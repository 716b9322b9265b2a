use serde::{Deserialize, Serialize};
use thiserror::Error;

use hsync_core::{DomainError, DomainResult, HospitalId};

const MAX_MEDICINE_NAME_LEN: usize = 200;

/// Canonical medicine name used as the inventory key.
///
/// Surrounding whitespace is trimmed on construction; after that, matching is
/// exact and case-sensitive. There is deliberately no fuzzy comparison here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MedicineName(String);

impl MedicineName {
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("medicine name cannot be empty"));
        }
        if trimmed.chars().count() > MAX_MEDICINE_NAME_LEN {
            return Err(DomainError::validation(format!(
                "medicine name exceeds {MAX_MEDICINE_NAME_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MedicineName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MedicineName> for String {
    fn from(value: MedicineName) -> Self {
        value.0
    }
}

impl core::fmt::Display for MedicineName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite inventory key: one stock line per (hospital, medicine).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InventoryKey {
    pub hospital_id: HospitalId,
    pub medicine: MedicineName,
}

impl InventoryKey {
    pub fn new(hospital_id: HospitalId, medicine: MedicineName) -> Self {
        Self { hospital_id, medicine }
    }
}

/// A debit could not be covered by the current stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("insufficient stock: required {required}, available {available}")]
pub struct StockShortfall {
    pub required: i64,
    pub available: i64,
}

impl StockShortfall {
    /// How many units are missing.
    pub fn shortfall(&self) -> i64 {
        self.required - self.available
    }
}

/// One stock line of a hospital pharmacy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    key: InventoryKey,
    stock: i64,
    threshold: i64,
    /// Unit price in minor currency units.
    unit_price: u64,
}

impl InventoryItem {
    /// Build a stock line, rejecting negative quantities.
    pub fn new(
        hospital_id: HospitalId,
        medicine: MedicineName,
        stock: i64,
        threshold: i64,
        unit_price: u64,
    ) -> DomainResult<Self> {
        if stock < 0 {
            return Err(DomainError::validation("stock quantity cannot be negative"));
        }
        if threshold < 0 {
            return Err(DomainError::validation("reorder threshold cannot be negative"));
        }
        Ok(Self {
            key: InventoryKey::new(hospital_id, medicine),
            stock,
            threshold,
            unit_price,
        })
    }

    pub fn key(&self) -> &InventoryKey {
        &self.key
    }

    pub fn hospital_id(&self) -> HospitalId {
        self.key.hospital_id
    }

    pub fn medicine(&self) -> &MedicineName {
        &self.key.medicine
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    /// Whether the line has reached its reorder threshold.
    pub fn needs_reorder(&self) -> bool {
        self.stock <= self.threshold
    }

    pub fn can_cover(&self, amount: i64) -> bool {
        amount >= 0 && self.stock >= amount
    }

    /// Compare-and-subtract. On success returns the remaining stock; on failure
    /// the item is left untouched.
    pub fn debit(&mut self, amount: i64) -> Result<i64, StockShortfall> {
        if !self.can_cover(amount) {
            return Err(StockShortfall {
                required: amount,
                available: self.stock,
            });
        }
        self.stock -= amount;
        Ok(self.stock)
    }
}
