//! Prescription issuing: validate a doctor's draft, bind it to a fresh access
//! code and persist it.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use hsync_core::{DomainError, PrescriptionId};
use hsync_prescriptions::{AccessCode, AccessCodeIssuer, Prescription, PrescriptionDraft};

use crate::store::{PrescriptionStore, StoreError};

#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Invalid(#[from] DomainError),

    /// Every generated code collided with a live one.
    #[error("could not allocate a unique access code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },

    #[error("storage failure")]
    Storage(#[source] StoreError),
}

/// A persisted prescription together with the code handed to the patient.
#[derive(Debug, Clone)]
pub struct IssuedPrescription {
    pub prescription: Prescription,
    pub access_code: AccessCode,
}

pub struct PrescriptionIssuer<S> {
    store: Arc<S>,
    codes: AccessCodeIssuer,
    max_attempts: u32,
}

impl<S> Clone for PrescriptionIssuer<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            codes: self.codes,
            max_attempts: self.max_attempts,
        }
    }
}

impl<S> PrescriptionIssuer<S>
where
    S: PrescriptionStore,
{
    pub fn new(store: Arc<S>, codes: AccessCodeIssuer, max_attempts: u32) -> Self {
        Self {
            store,
            codes,
            max_attempts: max_attempts.max(1),
        }
    }

    #[instrument(
        skip(self, draft),
        fields(hospital_id = %draft.hospital_id, medicine_count = draft.medicines.len()),
        err(Display)
    )]
    pub async fn issue(&self, draft: PrescriptionDraft) -> Result<IssuedPrescription, IssueError> {
        let id = PrescriptionId::new();

        for attempt in 1..=self.max_attempts {
            let access_code = self.codes.generate();
            let prescription =
                Prescription::issue(id, draft.clone(), access_code.clone(), Utc::now())?;

            match self.store.insert(&prescription).await {
                Ok(()) => {
                    tracing::info!(prescription_id = %id, attempt, "prescription issued");
                    return Ok(IssuedPrescription {
                        prescription,
                        access_code,
                    });
                }
                Err(StoreError::Conflict(_)) => {
                    tracing::warn!(prescription_id = %id, attempt, "access code collision, retrying");
                }
                Err(e) => return Err(IssueError::Storage(e)),
            }
        }

        Err(IssueError::CodeSpaceExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPharmacyStore;
    use hsync_core::{HospitalId, PatientId, StaffId};
    use hsync_inventory::MedicineName;
    use hsync_prescriptions::{AccessCodePolicy, CodeAlphabet, DosageRoutine, MedicineLineItem};

    fn draft(hospital_id: HospitalId) -> PrescriptionDraft {
        PrescriptionDraft {
            hospital_id,
            patient_id: PatientId::new(),
            doctor_id: StaffId::new(),
            diagnosis_code: "  E11.9 ".to_string(),
            medicines: vec![MedicineLineItem::new(
                MedicineName::new("Metformin").unwrap(),
                DosageRoutine::new(vec![1, 0, 1]).unwrap(),
                30,
            )],
            lab_tests: vec!["HbA1c".to_string(), " ".to_string()],
        }
    }

    #[tokio::test]
    async fn issued_prescription_is_retrievable_by_its_code() {
        let store = Arc::new(InMemoryPharmacyStore::new());
        let issuer = PrescriptionIssuer::new(store.clone(), AccessCodeIssuer::default(), 8);
        let h = HospitalId::new();

        let issued = issuer.issue(draft(h)).await.unwrap();
        assert_eq!(issued.access_code.as_str().len(), 6);
        assert_eq!(issued.prescription.diagnosis_code(), "E11.9");
        assert_eq!(issued.prescription.lab_tests(), ["HbA1c".to_string()]);

        let found = store
            .find_by_access_code_and_hospital(&issued.access_code, h)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id_typed(), issued.prescription.id_typed());
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_before_storage() {
        let store = Arc::new(InMemoryPharmacyStore::new());
        let issuer = PrescriptionIssuer::new(store, AccessCodeIssuer::default(), 8);
        let mut bad = draft(HospitalId::new());
        bad.medicines.clear();

        let err = issuer.issue(bad).await.unwrap_err();
        assert!(matches!(err, IssueError::Invalid(_)));
    }

    #[tokio::test]
    async fn exhausted_code_space_is_reported() {
        // Four numeric digits with a non-zero lead give 9000 codes; fill them.
        let policy = AccessCodePolicy::new(4, CodeAlphabet::Numeric).unwrap();
        let store = Arc::new(InMemoryPharmacyStore::new());
        let h = HospitalId::new();
        for n in 1000..=9999 {
            let p = Prescription::issue(
                PrescriptionId::new(),
                draft(h),
                AccessCode::parse(&n.to_string()).unwrap(),
                Utc::now(),
            )
            .unwrap();
            store.insert(&p).await.unwrap();
        }

        let issuer = PrescriptionIssuer::new(store, AccessCodeIssuer::new(policy), 3);
        let err = issuer.issue(draft(h)).await.unwrap_err();
        assert!(matches!(err, IssueError::CodeSpaceExhausted { attempts: 3 }));
    }
}
