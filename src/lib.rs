//! Order-to-provisioning reconciliation for game servers.
//!
//! A server request creates an `installing` server together with an
//! unresolved payment and a processor payment intent. Signed processor
//! webhooks later resolve the payment exactly once, the server status follows
//! it atomically, and live subscribers are told about the change.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
