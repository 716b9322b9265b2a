//! Storage ports and their adapters.

mod r#trait;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryPharmacyStore;
pub use postgres::PostgresPharmacyStore;
pub use r#trait::{
    AccessLogEntry, AccessLogStore, Debit, DispenseCommit, DispenseLedger, DispensedLine, InventoryStore, PharmacyStore,
    PrescriptionStore, StoreError,
};
