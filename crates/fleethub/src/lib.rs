//! `fleethub` - Fleet management for a luxury car rental business
//!
//! This library keeps a local view of a rental fleet in sync with a realtime
//! document store: it establishes a session, seeds an empty collection,
//! subscribes to live snapshots, and turns status toggles and log forms into
//! field-merge updates.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fixtures;
pub mod hub;
pub mod logging;
pub mod model;
pub mod store;
pub mod sync;

pub use client::{InventorySnapshot, StoreClient, Subscription, WriteOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use hub::VehicleHub;
pub use logging::init_logging;
pub use model::{ConditionEntry, ServiceRecord, Vehicle, VehicleStatus};
pub use store::{DocumentStore, SqliteStore, StoreStats};
pub use sync::{InventoryState, InventorySync, SyncPhase};
