use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use hsync_core::{DomainError, HospitalId, StaffId};
use hsync_infra::dispensing::DispenseError;
use hsync_inventory::{InventoryItem, MedicineName};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/dispense", post(dispense))
        .route("/verify-code", post(verify_code))
        .route("/add-inventory", post(add_inventory))
        .route("/my-inventory/:hospital_id", get(my_inventory))
        .route("/alerts/:hospital_id", get(alerts))
}

/// A hospital id that does not parse is treated like any other mismatch, so
/// the response never reveals which half of the request was wrong.
fn redemption_hospital(raw: &str) -> Result<HospitalId, DispenseError> {
    raw.parse().map_err(|_| DispenseError::NotFoundOrMismatch)
}

fn path_hospital(raw: &str) -> Result<HospitalId, axum::response::Response> {
    raw.parse::<HospitalId>()
        .map_err(errors::domain_error_to_response)
}

pub async fn dispense(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::DispenseRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let hospital_id = match redemption_hospital(&body.hospital_id) {
        Ok(id) => id,
        Err(e) => return errors::dispense_error_to_response(e),
    };

    match services.redeem(&body.access_code, hospital_id).await {
        Ok(receipt) => Json(dto::dispense_response(&receipt)).into_response(),
        Err(e) => errors::dispense_error_to_response(e),
    }
}

pub async fn verify_code(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::VerifyCodeRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let hospital_id = match redemption_hospital(&body.hospital_id) {
        Ok(id) => id,
        Err(e) => return errors::dispense_error_to_response(e),
    };

    let viewer = match body.staff_id.parse::<StaffId>() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.verify(&body.access_code, hospital_id, viewer).await {
        Ok(prescription) => Json(dto::prescription_summary(&prescription)).into_response(),
        Err(e) => errors::dispense_error_to_response(e),
    }
}

pub async fn add_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::AddInventoryRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let item = match inventory_item_from(body) {
        Ok(item) => item,
        Err(e) => return errors::domain_error_to_response(e),
    };

    if let Err(e) = services.upsert_item(&item).await {
        return errors::store_error_to_response(e);
    }

    tracing::info!(
        hospital_id = %item.hospital_id(),
        medicine = %item.medicine(),
        stock = item.stock(),
        "inventory line upserted"
    );
    (StatusCode::OK, Json(dto::inventory_item(&item))).into_response()
}

fn inventory_item_from(body: dto::AddInventoryRequest) -> Result<InventoryItem, DomainError> {
    let hospital_id: HospitalId = body.hospital_id.parse()?;
    let medicine = MedicineName::new(body.medicine_name)?;
    let unit_price = u64::try_from(body.unit_price)
        .map_err(|_| DomainError::validation("unit price cannot be negative"))?;
    InventoryItem::new(
        hospital_id,
        medicine,
        body.stock_quantity,
        body.threshold_limit,
        unit_price,
    )
}

pub async fn my_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Path(hospital_id): Path<String>,
) -> axum::response::Response {
    let hospital_id = match path_hospital(&hospital_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.list_items(hospital_id).await {
        Ok(items) => Json(dto::inventory_list(&items)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn alerts(
    Extension(services): Extension<Arc<AppServices>>,
    Path(hospital_id): Path<String>,
) -> axum::response::Response {
    let hospital_id = match path_hospital(&hospital_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.low_stock(hospital_id).await {
        Ok(items) => Json(dto::inventory_list(&items)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
