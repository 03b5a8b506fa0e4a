//! Data models for Packrat

mod entity;
mod item;
mod person;
mod rule;
mod trip;

pub use entity::{EntityType, Syncable};
pub use item::TripItem;
pub use person::Person;
pub use rule::{DefaultItemRule, RulePack, TripRule};
pub use trip::{DayItem, Trip, TripDay, TripSettings};
