use serde::Deserialize;
use serde_json::{Value, json};

use hsync_infra::dispensing::DispenseReceipt;
use hsync_inventory::InventoryItem;
use hsync_prescriptions::Prescription;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseRequest {
    pub access_code: String,
    pub hospital_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeRequest {
    pub access_code: String,
    pub hospital_id: String,
    /// Pharmacist recorded in the privacy access log.
    pub staff_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInventoryRequest {
    pub hospital_id: String,
    #[serde(alias = "itemName")]
    pub medicine_name: String,
    #[serde(alias = "stockCount")]
    pub stock_quantity: i64,
    #[serde(default, alias = "threshold_limit")]
    pub threshold_limit: i64,
    /// Minor currency units.
    #[serde(default)]
    pub unit_price: i64,
}

#[derive(Debug, Deserialize)]
pub struct MedicineLineRequest {
    pub name: String,
    pub routine: Vec<u32>,
    pub days: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescribeRequest {
    pub hospital_id: String,
    pub patient_id: String,
    pub staff_id: String,
    pub diagnosis: String,
    pub meds: Vec<MedicineLineRequest>,
    #[serde(default)]
    pub tests: Vec<String>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn dispense_response(receipt: &DispenseReceipt) -> Value {
    json!({
        "success": true,
        "prescriptionId": receipt.prescription_id.to_string(),
        "dispensedAt": receipt.dispensed_at,
        "dispensed": receipt.lines.iter().map(|line| json!({
            "medicine": line.medicine.as_str(),
            "quantityDeducted": line.quantity,
            "remaining": line.remaining,
        })).collect::<Vec<_>>(),
    })
}

/// What a pharmacist sees after a successful code check.
pub fn prescription_summary(prescription: &Prescription) -> Value {
    json!({
        "recordId": prescription.id_typed().to_string(),
        "hospitalId": prescription.hospital_id().to_string(),
        "patientId": prescription.patient_id().to_string(),
        "diagnosisCode": prescription.diagnosis_code(),
        "labTests": prescription.lab_tests(),
        "createdAt": prescription.created_at(),
        "medicines": prescription.medicines().iter().map(|line| json!({
            "name": line.name.as_str(),
            "routine": line.routine.slots(),
            "days": line.days,
            "quantity": line.required_quantity().ok(),
        })).collect::<Vec<_>>(),
    })
}

pub fn inventory_item(item: &InventoryItem) -> Value {
    json!({
        "hospitalId": item.hospital_id().to_string(),
        "medicineName": item.medicine().as_str(),
        "stockQuantity": item.stock(),
        "thresholdLimit": item.threshold(),
        "unitPrice": item.unit_price(),
        "needsReorder": item.needs_reorder(),
    })
}

pub fn inventory_list(items: &[InventoryItem]) -> Value {
    Value::Array(items.iter().map(inventory_item).collect())
}
