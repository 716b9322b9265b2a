//! Prescription redemption.
//!
//! `DispensingEngine::redeem` turns a submitted (access code, hospital) pair
//! into exactly one atomic inventory transaction:
//!
//! 1. Parse the code and look up the undispensed prescription bound to it and
//!    to the requesting hospital.
//! 2. Build the dispense plan (per-medicine quantities).
//! 3. Hand the plan to [`DispenseLedger::commit_dispense`], which claims the
//!    prescription and applies every debit, or changes nothing.
//!
//! An unknown code, a malformed code and a code belonging to another hospital
//! all produce the same [`DispenseError::NotFoundOrMismatch`].
//!
//! `verify` resolves a code without consuming it and appends a privacy
//! access-log row naming the staff member who looked.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use hsync_core::{HospitalId, PrescriptionId, StaffId};
use hsync_inventory::MedicineName;
use hsync_prescriptions::{AccessCode, Prescription};

use crate::store::{
    AccessLogEntry, AccessLogStore, DispenseCommit, DispenseLedger, DispensedLine,
    PrescriptionStore, StoreError,
};

/// Reason recorded for every access-log row written by [`DispensingEngine::verify`].
pub const VERIFICATION_REASON: &str = "Pharmacy Verification";

/// Redemption failures. Every variant leaves inventory and the prescription
/// exactly as they were.
#[derive(Debug, Error)]
pub enum DispenseError {
    #[error("Invalid or expired access code")]
    NotFoundOrMismatch,

    #[error("prescription has already been dispensed")]
    AlreadyDispensed,

    #[error("insufficient stock for {medicine}: required {required}, available {available}")]
    InsufficientStock {
        medicine: MedicineName,
        required: i64,
        available: i64,
    },

    #[error("invalid prescription: {0}")]
    InvalidPrescription(String),

    #[error("storage failure")]
    StorageFailure(#[from] StoreError),
}

impl DispenseError {
    /// Stable machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            DispenseError::NotFoundOrMismatch => "not_found_or_mismatch",
            DispenseError::AlreadyDispensed => "already_dispensed",
            DispenseError::InsufficientStock { .. } => "insufficient_stock",
            DispenseError::InvalidPrescription(_) => "invalid_prescription",
            DispenseError::StorageFailure(_) => "storage_failure",
        }
    }
}

/// What a successful redemption did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispenseReceipt {
    pub prescription_id: PrescriptionId,
    pub hospital_id: HospitalId,
    pub dispensed_at: DateTime<Utc>,
    pub lines: Vec<DispensedLine>,
}

impl DispenseReceipt {
    pub fn total_units(&self) -> i64 {
        self.lines
            .iter()
            .fold(0i64, |acc, l| acc.saturating_add(l.quantity))
    }
}

/// Redeems and verifies access codes against a pharmacy store.
#[derive(Debug)]
pub struct DispensingEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for DispensingEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> DispensingEngine<S>
where
    S: PrescriptionStore + DispenseLedger,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Redeem `access_code` on behalf of `hospital_id`.
    #[instrument(skip(self, access_code), fields(hospital_id = %hospital_id))]
    pub async fn redeem(
        &self,
        access_code: &str,
        hospital_id: HospitalId,
    ) -> Result<DispenseReceipt, DispenseError> {
        let prescription = self.locate(access_code, hospital_id).await?;
        let prescription_id = prescription.id_typed();

        // The lookup only returns live prescriptions; a dispensed one here means
        // the backend returned a stale row.
        if prescription.is_dispensed() {
            return Err(DispenseError::AlreadyDispensed);
        }

        let plan = prescription
            .dispense_plan()
            .map_err(|e| DispenseError::InvalidPrescription(e.to_string()))?;

        let dispensed_at = Utc::now();
        match self.store.commit_dispense(&plan, dispensed_at).await {
            Ok(DispenseCommit::Committed { lines }) => {
                let receipt = DispenseReceipt {
                    prescription_id,
                    hospital_id,
                    dispensed_at,
                    lines,
                };
                tracing::info!(
                    prescription_id = %prescription_id,
                    lines = receipt.lines.len(),
                    units = receipt.total_units(),
                    "prescription dispensed"
                );
                Ok(receipt)
            }
            Ok(DispenseCommit::ClaimLost) => {
                // Another redemption won the race, or the row changed between
                // lookup and commit.
                match self.store.get(prescription_id).await? {
                    Some(current) if current.is_dispensed() => Err(DispenseError::AlreadyDispensed),
                    _ => Err(DispenseError::NotFoundOrMismatch),
                }
            }
            Ok(DispenseCommit::Shortfall { medicine, shortfall }) => {
                tracing::warn!(
                    prescription_id = %prescription_id,
                    medicine = %medicine,
                    required = shortfall.required,
                    available = shortfall.available,
                    "insufficient stock, nothing dispensed"
                );
                Err(DispenseError::InsufficientStock {
                    medicine,
                    required: shortfall.required,
                    available: shortfall.available,
                })
            }
            Err(e) => {
                tracing::error!(prescription_id = %prescription_id, error = %e, "dispense commit failed");
                Err(DispenseError::StorageFailure(e))
            }
        }
    }

    async fn locate(
        &self,
        access_code: &str,
        hospital_id: HospitalId,
    ) -> Result<Prescription, DispenseError> {
        let code = AccessCode::parse(access_code).map_err(|_| DispenseError::NotFoundOrMismatch)?;
        self.store
            .find_by_access_code_and_hospital(&code, hospital_id)
            .await?
            .ok_or(DispenseError::NotFoundOrMismatch)
    }
}

impl<S> DispensingEngine<S>
where
    S: PrescriptionStore + DispenseLedger + AccessLogStore,
{
    /// Resolve the prescription a code would redeem, with the same opacity
    /// rules as [`redeem`](Self::redeem), and log the view under `viewer`.
    ///
    /// Failed lookups leave no log row.
    #[instrument(skip(self, access_code), fields(hospital_id = %hospital_id, viewer_id = %viewer))]
    pub async fn verify(
        &self,
        access_code: &str,
        hospital_id: HospitalId,
        viewer: StaffId,
    ) -> Result<Prescription, DispenseError> {
        let prescription = self.locate(access_code, hospital_id).await?;
        let entry = AccessLogEntry {
            viewer_id: viewer,
            patient_id: prescription.patient_id(),
            record_id: prescription.id_typed(),
            reason: VERIFICATION_REASON.to_string(),
            viewed_at: Utc::now(),
        };
        self.store.record_access(&entry).await?;
        Ok(prescription)
    }
}
