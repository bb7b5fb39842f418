//! Adapters for the domain ports: ledger stores and payment processors.

pub mod fake_processor;
pub mod http_processor;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
