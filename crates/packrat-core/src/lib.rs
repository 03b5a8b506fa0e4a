//! packrat-core - Core library for Packrat
//!
//! This crate contains the shared models, local database layer, and the
//! offline-first sync engine used by all Packrat interfaces.

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{EntityType, Syncable, Trip, TripItem};
pub use sync::{SyncEngine, SyncOptions};
