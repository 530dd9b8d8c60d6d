//! APN Push Delivery
//!
//! Binary-protocol delivery to the legacy Apple Push Notification gateway,
//! with rollback of notifications the gateway did not take, and feedback
//! service reconciliation.

mod config;
mod connector;
mod delivery;
mod error;
mod feedback;
mod gateway;
mod reconcile;
mod service;

#[cfg(test)]
mod testing;

pub use config::*;
pub use connector::*;
pub use delivery::*;
pub use error::*;
pub use feedback::*;
pub use gateway::*;
pub use reconcile::*;
pub use service::*;

// Re-export for convenience
pub use apn_storage;
