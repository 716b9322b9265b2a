use std::sync::Arc;

use hsync_core::{HospitalId, StaffId};
use hsync_infra::config::{AccessCodeConfig, AppConfig, StorageConfig};
use hsync_infra::dispensing::{DispenseError, DispenseReceipt, DispensingEngine};
use hsync_infra::prescribing::{IssueError, IssuedPrescription, PrescriptionIssuer};
use hsync_infra::store::{
    InMemoryPharmacyStore, InventoryStore, PharmacyStore, PostgresPharmacyStore, StoreError,
};
use hsync_inventory::InventoryItem;
use hsync_prescriptions::{AccessCodeIssuer, Prescription, PrescriptionDraft};

/// Workflows bound to one storage backend. All handles share the same store.
pub struct Pharmacy<S> {
    pub store: Arc<S>,
    pub engine: DispensingEngine<S>,
    pub issuer: PrescriptionIssuer<S>,
}

impl<S> Pharmacy<S>
where
    S: PharmacyStore,
{
    pub fn new(store: Arc<S>, codes: &AccessCodeConfig) -> Self {
        Self {
            engine: DispensingEngine::new(store.clone()),
            issuer: PrescriptionIssuer::new(
                store.clone(),
                AccessCodeIssuer::new(codes.policy),
                codes.max_attempts,
            ),
            store,
        }
    }
}

/// Storage backend selected at startup.
pub enum AppServices {
    InMemory(Pharmacy<InMemoryPharmacyStore>),
    Persistent(Pharmacy<PostgresPharmacyStore>),
}

/// Run `$body` against whichever backend is active.
macro_rules! with_pharmacy {
    ($services:expr, $p:ident => $body:expr) => {
        match $services {
            AppServices::InMemory($p) => $body,
            AppServices::Persistent($p) => $body,
        }
    };
}

impl AppServices {
    pub fn in_memory(codes: &AccessCodeConfig) -> Self {
        AppServices::InMemory(Pharmacy::new(Arc::new(InMemoryPharmacyStore::new()), codes))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            AppServices::InMemory(_) => "in_memory",
            AppServices::Persistent(_) => "postgres",
        }
    }

    pub async fn redeem(
        &self,
        access_code: &str,
        hospital_id: HospitalId,
    ) -> Result<DispenseReceipt, DispenseError> {
        with_pharmacy!(self, p => p.engine.redeem(access_code, hospital_id).await)
    }

    pub async fn verify(
        &self,
        access_code: &str,
        hospital_id: HospitalId,
        viewer: StaffId,
    ) -> Result<Prescription, DispenseError> {
        with_pharmacy!(self, p => p.engine.verify(access_code, hospital_id, viewer).await)
    }

    pub async fn issue(&self, draft: PrescriptionDraft) -> Result<IssuedPrescription, IssueError> {
        with_pharmacy!(self, p => p.issuer.issue(draft).await)
    }

    pub async fn upsert_item(&self, item: &InventoryItem) -> Result<(), StoreError> {
        with_pharmacy!(self, p => p.store.upsert(item).await)
    }

    pub async fn list_items(&self, hospital_id: HospitalId) -> Result<Vec<InventoryItem>, StoreError> {
        with_pharmacy!(self, p => p.store.list(hospital_id).await)
    }

    pub async fn low_stock(&self, hospital_id: HospitalId) -> Result<Vec<InventoryItem>, StoreError> {
        with_pharmacy!(self, p => p.store.low_stock(hospital_id).await)
    }
}

/// Build services from config.
///
/// `StorageConfig::InMemory` is meant for dev/tests; state is lost on restart.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    match &config.storage {
        StorageConfig::InMemory => Ok(AppServices::in_memory(&config.access_codes)),
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresPharmacyStore::connect(database_url, *max_connections).await?;
            store.ensure_schema().await?;
            Ok(AppServices::Persistent(Pharmacy::new(
                Arc::new(store),
                &config.access_codes,
            )))
        }
    }
}
