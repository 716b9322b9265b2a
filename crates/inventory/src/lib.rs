//! Pharmacy inventory domain.
//!
//! Per-hospital, per-medicine stock ledger rules, implemented as deterministic
//! domain logic (no IO, no storage). Storage adapters live in `hsync-infra`.

pub mod item;

pub use item::{InventoryItem, InventoryKey, MedicineName, StockShortfall};
