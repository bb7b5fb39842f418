//! Domain entities and the ports the application layer depends on.

pub mod event;
pub mod payment;
pub mod ports;
pub mod server;
