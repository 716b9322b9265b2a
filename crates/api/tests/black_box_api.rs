use std::sync::Arc;

use hsync_api::app::services::{AppServices, Pharmacy};
use hsync_core::{PrescriptionId, StaffId};
use hsync_infra::config::AccessCodeConfig;
use hsync_infra::store::{AccessLogStore, InMemoryPharmacyStore};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(AppServices::in_memory(&AccessCodeConfig::default())).await
    }

    /// Spawn against a store the test keeps a handle to.
    async fn spawn_with_store() -> (Self, Arc<InMemoryPharmacyStore>) {
        let store = Arc::new(InMemoryPharmacyStore::new());
        let services = AppServices::InMemory(Pharmacy::new(store.clone(), &AccessCodeConfig::default()));
        (Self::spawn_with(services).await, store)
    }

    async fn spawn_with(services: AppServices) -> Self {
        // Same router as prod, in-memory backend, ephemeral port.
        let app = hsync_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn stock(&self, hospital_id: &str, medicine: &str, quantity: i64, threshold: i64) {
        let (status, _) = self
            .post(
                "/api/v1/pharmacy/add-inventory",
                json!({
                    "hospitalId": hospital_id,
                    "medicineName": medicine,
                    "stockQuantity": quantity,
                    "thresholdLimit": threshold,
                    "unitPrice": 150,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    /// Returns the issued access code.
    async fn prescribe(&self, hospital_id: &str, meds: Value) -> String {
        self.prescribe_record(hospital_id, meds).await.0
    }

    /// Returns the issued access code and the record id.
    async fn prescribe_record(&self, hospital_id: &str, meds: Value) -> (String, String) {
        let (status, body) = self
            .post(
                "/api/v1/doctor/prescribe",
                json!({
                    "hospitalId": hospital_id,
                    "patientId": Uuid::now_v7().to_string(),
                    "staffId": Uuid::now_v7().to_string(),
                    "diagnosis": "J06.9",
                    "meds": meds,
                    "tests": ["CBC"],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "prescribe failed: {body}");
        assert_eq!(body["message"], "Prescription Finalized");
        (
            body["accessCode"].as_str().unwrap().to_string(),
            body["recordId"].as_str().unwrap().to_string(),
        )
    }

    async fn verify(&self, code: &str, hospital_id: &str, staff_id: &str) -> (StatusCode, Value) {
        self.post(
            "/api/v1/pharmacy/verify-code",
            json!({ "accessCode": code, "hospitalId": hospital_id, "staffId": staff_id }),
        )
        .await
    }

    async fn stock_of(&self, hospital_id: &str, medicine: &str) -> i64 {
        let (status, body) = self
            .get(&format!("/api/v1/pharmacy/my-inventory/{hospital_id}"))
            .await;
        assert_eq!(status, StatusCode::OK);
        body.as_array()
            .unwrap()
            .iter()
            .find(|item| item["medicineName"] == medicine)
            .and_then(|item| item["stockQuantity"].as_i64())
            .unwrap_or(0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn hospital() -> String {
    Uuid::now_v7().to_string()
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn prescribe_then_dispense_debits_inventory_once() {
    let server = TestServer::spawn().await;
    let h = hospital();
    server.stock(&h, "Paracetamol", 12, 3).await;
    let code = server
        .prescribe(&h, json!([{ "name": "Paracetamol", "routine": [1, 0, 1], "days": 5 }]))
        .await;

    let (status, body) = server
        .post("/api/v1/pharmacy/dispense", json!({ "accessCode": code, "hospitalId": h }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["dispensed"],
        json!([{ "medicine": "Paracetamol", "quantityDeducted": 10, "remaining": 2 }])
    );
    assert_eq!(server.stock_of(&h, "Paracetamol").await, 2);

    // The code is single-use.
    let (status, body) = server
        .post("/api/v1/pharmacy/dispense", json!({ "accessCode": code, "hospitalId": h }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found_or_mismatch");
    assert_eq!(server.stock_of(&h, "Paracetamol").await, 2);
}

#[tokio::test]
async fn insufficient_stock_names_medicine_and_shortfall() {
    let server = TestServer::spawn().await;
    let h = hospital();
    server.stock(&h, "Paracetamol", 8, 3).await;
    let code = server
        .prescribe(&h, json!([{ "name": "Paracetamol", "routine": [1, 0, 1], "days": 5 }]))
        .await;

    let (status, body) = server
        .post("/api/v1/pharmacy/dispense", json!({ "accessCode": code, "hospitalId": h }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "insufficient_stock");
    assert_eq!(body["medicine"], "Paracetamol");
    assert_eq!(body["required"], 10);
    assert_eq!(body["available"], 8);
    assert_eq!(body["shortfall"], 2);
    assert_eq!(server.stock_of(&h, "Paracetamol").await, 8);

    // Nothing was consumed: the code still verifies.
    let (status, _) = server.verify(&code, &h, &Uuid::now_v7().to_string()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn wrong_hospital_looks_like_unknown_code() {
    let server = TestServer::spawn().await;
    let h = hospital();
    server.stock(&h, "Zinc", 10, 0).await;
    let code = server
        .prescribe(&h, json!([{ "name": "Zinc", "routine": [1], "days": 3 }]))
        .await;

    let (wrong_status, wrong_body) = server
        .post("/api/v1/pharmacy/dispense", json!({ "accessCode": code, "hospitalId": hospital() }))
        .await;
    let (unknown_status, unknown_body) = server
        .post("/api/v1/pharmacy/dispense", json!({ "accessCode": "ZZZZZZZZ", "hospitalId": h }))
        .await;
    let (garbage_status, garbage_body) = server
        .post("/api/v1/pharmacy/dispense", json!({ "accessCode": code, "hospitalId": "not-a-uuid" }))
        .await;

    assert_eq!(wrong_status, StatusCode::NOT_FOUND);
    assert_eq!(wrong_status, unknown_status);
    assert_eq!(wrong_status, garbage_status);
    assert_eq!(wrong_body, unknown_body);
    assert_eq!(wrong_body, garbage_body);
    assert_eq!(server.stock_of(&h, "Zinc").await, 10);
}

#[tokio::test]
async fn verify_code_returns_derived_quantities() {
    let server = TestServer::spawn().await;
    let h = hospital();
    let code = server
        .prescribe(
            &h,
            json!([
                { "name": "Amoxicillin", "routine": [1, 1, 1], "days": 7 },
                { "name": "Ibuprofen", "routine": [1, 0, 1], "days": 3 },
            ]),
        )
        .await;

    let (status, body) = server.verify(&code, &h, &Uuid::now_v7().to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["diagnosisCode"], "J06.9");
    assert_eq!(body["labTests"], json!(["CBC"]));
    assert_eq!(body["medicines"][0]["quantity"], 21);
    assert_eq!(body["medicines"][1]["quantity"], 6);
}

#[tokio::test]
async fn verify_code_writes_access_log_only_on_success() {
    let (server, store) = TestServer::spawn_with_store().await;
    let h = hospital();
    let pharmacist = Uuid::now_v7().to_string();
    let (code, record_id) = server
        .prescribe_record(&h, json!([{ "name": "Zinc", "routine": [1], "days": 3 }]))
        .await;
    let record_id: PrescriptionId = record_id.parse().unwrap();

    let (status, _) = server.verify(&code, &hospital(), &pharmacist).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = server.verify(&code, &h, "not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
    assert!(store.access_log(record_id).await.unwrap().is_empty());

    let (status, _) = server.verify(&code, &h, &pharmacist).await;
    assert_eq!(status, StatusCode::OK);
    let log = store.access_log(record_id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].viewer_id, pharmacist.parse::<StaffId>().unwrap());
    assert_eq!(log[0].reason, "Pharmacy Verification");
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post("/api/v1/pharmacy/dispense", json!({ "hospitalId": hospital() }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_body");
    assert!(body["message"].as_str().unwrap().contains("accessCode"));

    let res = server
        .client
        .post(format!("{}/api/v1/doctor/prescribe", server.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_body");
}

#[tokio::test]
async fn prescribe_rejects_invalid_drafts() {
    let server = TestServer::spawn().await;
    let h = hospital();

    let (status, body) = server
        .post(
            "/api/v1/doctor/prescribe",
            json!({
                "hospitalId": h,
                "patientId": Uuid::now_v7().to_string(),
                "staffId": Uuid::now_v7().to_string(),
                "diagnosis": "J06.9",
                "meds": [],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = server
        .post(
            "/api/v1/doctor/prescribe",
            json!({
                "hospitalId": "nope",
                "patientId": Uuid::now_v7().to_string(),
                "staffId": Uuid::now_v7().to_string(),
                "diagnosis": "J06.9",
                "meds": [{ "name": "Zinc", "routine": [1], "days": 1 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn inventory_listing_and_alerts() {
    let server = TestServer::spawn().await;
    let h = hospital();
    server.stock(&h, "Zinc", 4, 10).await;
    server.stock(&h, "Amoxicillin", 200, 20).await;
    server.stock(&h, "Ibuprofen", 20, 20).await;
    server.stock(&hospital(), "Aspirin", 0, 5).await;

    let (status, body) = server.get(&format!("/api/v1/pharmacy/my-inventory/{h}")).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["medicineName"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Amoxicillin", "Ibuprofen", "Zinc"]);

    let (status, body) = server.get(&format!("/api/v1/pharmacy/alerts/{h}")).await;
    assert_eq!(status, StatusCode::OK);
    let low: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["medicineName"].as_str().unwrap())
        .collect();
    assert_eq!(low, ["Ibuprofen", "Zinc"]);

    // The original client contract spells the threshold in snake case.
    let (status, _) = server
        .post(
            "/api/v1/pharmacy/add-inventory",
            json!({
                "hospitalId": h,
                "medicineName": "Cetirizine",
                "stockQuantity": 5,
                "threshold_limit": 50,
                "unitPrice": 1,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = server.get(&format!("/api/v1/pharmacy/alerts/{h}")).await;
    let low: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["medicineName"].as_str().unwrap())
        .collect();
    assert_eq!(low, ["Cetirizine", "Ibuprofen", "Zinc"]);

    let (status, body) = server.get("/api/v1/pharmacy/alerts/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn add_inventory_rejects_negative_values() {
    let server = TestServer::spawn().await;
    let (status, body) = server
        .post(
            "/api/v1/pharmacy/add-inventory",
            json!({ "hospitalId": hospital(), "medicineName": "Zinc", "stockQuantity": -1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = server
        .post(
            "/api/v1/pharmacy/add-inventory",
            json!({ "hospitalId": hospital(), "medicineName": "Zinc", "stockQuantity": 1, "unitPrice": -5 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_dispense_requests_succeed_once() {
    let server = TestServer::spawn().await;
    let h = hospital();
    server.stock(&h, "Omeprazole", 100, 0).await;
    let code = server
        .prescribe(&h, json!([{ "name": "Omeprazole", "routine": [1], "days": 14 }]))
        .await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let client = server.client.clone();
        let url = format!("{}/api/v1/pharmacy/dispense", server.base_url);
        let body = json!({ "accessCode": code, "hospitalId": h });
        handles.push(tokio::spawn(async move {
            client.post(url).json(&body).send().await.unwrap().status()
        }));
    }

    let mut ok = 0;
    for handle in handles {
        let status = handle.await.unwrap();
        if status == StatusCode::OK {
            ok += 1;
        } else {
            assert!(status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT);
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(server.stock_of(&h, "Omeprazole").await, 86);
}
