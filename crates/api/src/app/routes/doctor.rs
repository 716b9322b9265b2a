use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde_json::json;

use hsync_core::{DomainError, HospitalId, PatientId, StaffId};
use hsync_inventory::MedicineName;
use hsync_prescriptions::{DosageRoutine, MedicineLineItem, PrescriptionDraft};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/prescribe", post(prescribe))
}

/// Finalize a consultation: persist the prescription and hand back the code
/// the patient takes to the pharmacy.
pub async fn prescribe(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::PrescribeRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let draft = match draft_from(body) {
        Ok(draft) => draft,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let issued = match services.issue(draft).await {
        Ok(issued) => issued,
        Err(e) => return errors::issue_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(json!({
            "message": "Prescription Finalized",
            "accessCode": issued.access_code.as_str(),
            "recordId": issued.prescription.id_typed().to_string(),
        })),
    )
        .into_response()
}

fn draft_from(body: dto::PrescribeRequest) -> Result<PrescriptionDraft, DomainError> {
    let medicines = body
        .meds
        .into_iter()
        .map(|line| -> Result<MedicineLineItem, DomainError> {
            Ok(MedicineLineItem::new(
                MedicineName::new(line.name)?,
                DosageRoutine::new(line.routine)?,
                line.days,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PrescriptionDraft {
        hospital_id: body.hospital_id.parse::<HospitalId>()?,
        patient_id: body.patient_id.parse::<PatientId>()?,
        doctor_id: body.staff_id.parse::<StaffId>()?,
        diagnosis_code: body.diagnosis,
        medicines,
        lab_tests: body.tests,
    })
}
