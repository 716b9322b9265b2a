//! Infrastructure layer: storage adapters, configuration and the pharmacy
//! workflows that sit on top of them.

pub mod config;
pub mod dispensing;
pub mod prescribing;
pub mod store;
