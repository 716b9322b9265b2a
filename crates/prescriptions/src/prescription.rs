use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hsync_core::{DomainError, DomainResult, HospitalId, PatientId, PrescriptionId, StaffId};

use crate::access_code::AccessCode;
use crate::medicine::MedicineLineItem;
use crate::plan::DispensePlan;

const MAX_DIAGNOSIS_LEN: usize = 64;

/// Dispensing lifecycle of a prescription.
///
/// Only two states exist: awaiting redemption (holding its code) or dispensed
/// (code cleared). The enum makes "dispensed with a live code" unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispenseState {
    Awaiting { access_code: AccessCode },
    Dispensed { dispensed_at: DateTime<Utc> },
}

impl DispenseState {
    /// Rebuild the state from its column representation
    /// (`access_code`, `dispensed`, `dispensed_at`).
    pub fn from_columns(
        access_code: Option<AccessCode>,
        dispensed: bool,
        dispensed_at: Option<DateTime<Utc>>,
    ) -> DomainResult<Self> {
        match (access_code, dispensed, dispensed_at) {
            (Some(access_code), false, None) => Ok(DispenseState::Awaiting { access_code }),
            (None, true, Some(dispensed_at)) => Ok(DispenseState::Dispensed { dispensed_at }),
            (Some(_), true, _) => Err(DomainError::invariant(
                "dispensed prescription still holds an access code",
            )),
            (None, false, _) => Err(DomainError::invariant(
                "undispensed prescription has no access code",
            )),
            (_, true, None) => Err(DomainError::invariant(
                "dispensed prescription has no dispensed timestamp",
            )),
            (Some(_), false, Some(_)) => Err(DomainError::invariant(
                "undispensed prescription has a dispensed timestamp",
            )),
        }
    }

    pub fn access_code(&self) -> Option<&AccessCode> {
        match self {
            DispenseState::Awaiting { access_code } => Some(access_code),
            DispenseState::Dispensed { .. } => None,
        }
    }

    pub fn is_dispensed(&self) -> bool {
        matches!(self, DispenseState::Dispensed { .. })
    }

    pub fn dispensed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DispenseState::Awaiting { .. } => None,
            DispenseState::Dispensed { dispensed_at } => Some(*dispensed_at),
        }
    }
}

/// What the doctor-finalization workflow submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionDraft {
    pub hospital_id: HospitalId,
    pub patient_id: PatientId,
    pub doctor_id: StaffId,
    pub diagnosis_code: String,
    pub medicines: Vec<MedicineLineItem>,
    #[serde(default)]
    pub lab_tests: Vec<String>,
}

impl PrescriptionDraft {
    /// Validate and normalize (trimmed diagnosis, blank lab tests dropped).
    fn normalized(mut self) -> DomainResult<Self> {
        let diagnosis = self.diagnosis_code.trim();
        if diagnosis.is_empty() {
            return Err(DomainError::validation("diagnosis code cannot be empty"));
        }
        if diagnosis.chars().count() > MAX_DIAGNOSIS_LEN {
            return Err(DomainError::validation(format!(
                "diagnosis code exceeds {MAX_DIAGNOSIS_LEN} characters"
            )));
        }
        self.diagnosis_code = diagnosis.to_string();

        if self.medicines.is_empty() {
            return Err(DomainError::validation(
                "prescription must order at least one medicine",
            ));
        }
        for line in &self.medicines {
            line.validate()?;
        }

        self.lab_tests = self
            .lab_tests
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(self)
    }
}

/// Prescription record: diagnosis, ordered medicines and dispensing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prescription {
    id: PrescriptionId,
    hospital_id: HospitalId,
    patient_id: PatientId,
    doctor_id: StaffId,
    diagnosis_code: String,
    medicines: Vec<MedicineLineItem>,
    lab_tests: Vec<String>,
    created_at: DateTime<Utc>,
    state: DispenseState,
}

impl Prescription {
    /// Create a fresh, undispensed prescription bound to `access_code`.
    pub fn issue(
        id: PrescriptionId,
        draft: PrescriptionDraft,
        access_code: AccessCode,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::from_parts(
            id,
            draft,
            DispenseState::Awaiting { access_code },
            created_at,
        )
    }

    /// Rebuild a stored prescription, re-validating its contents.
    pub fn from_parts(
        id: PrescriptionId,
        draft: PrescriptionDraft,
        state: DispenseState,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let draft = draft.normalized()?;
        Ok(Self {
            id,
            hospital_id: draft.hospital_id,
            patient_id: draft.patient_id,
            doctor_id: draft.doctor_id,
            diagnosis_code: draft.diagnosis_code,
            medicines: draft.medicines,
            lab_tests: draft.lab_tests,
            created_at,
            state,
        })
    }

    pub fn id_typed(&self) -> PrescriptionId {
        self.id
    }

    pub fn hospital_id(&self) -> HospitalId {
        self.hospital_id
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn doctor_id(&self) -> StaffId {
        self.doctor_id
    }

    pub fn diagnosis_code(&self) -> &str {
        &self.diagnosis_code
    }

    pub fn medicines(&self) -> &[MedicineLineItem] {
        &self.medicines
    }

    pub fn lab_tests(&self) -> &[String] {
        &self.lab_tests
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> &DispenseState {
        &self.state
    }

    pub fn access_code(&self) -> Option<&AccessCode> {
        self.state.access_code()
    }

    pub fn is_dispensed(&self) -> bool {
        self.state.is_dispensed()
    }

    pub fn dispensed_at(&self) -> Option<DateTime<Utc>> {
        self.state.dispensed_at()
    }

    /// Exact match on both the live code and the owning hospital.
    pub fn is_bound_to(&self, code: &AccessCode, hospital_id: HospitalId) -> bool {
        self.hospital_id == hospital_id && self.access_code() == Some(code)
    }

    /// Per-medicine debits needed to fulfil this prescription.
    pub fn dispense_plan(&self) -> DomainResult<DispensePlan> {
        let access_code = self
            .access_code()
            .ok_or_else(|| DomainError::conflict("prescription already dispensed"))?
            .clone();
        DispensePlan::build(self.id, self.hospital_id, access_code, &self.medicines)
    }

    /// Terminal transition: mark dispensed and clear the access code.
    pub fn mark_dispensed(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.is_dispensed() {
            return Err(DomainError::conflict("prescription already dispensed"));
        }
        self.state = DispenseState::Dispensed { dispensed_at: at };
        Ok(())
    }
}
