//! Local database layer for Packrat

mod change_log;
mod conflict_store;
mod connection;
mod entity_store;
mod meta;
mod migrations;

pub use change_log::ChangeLog;
pub use conflict_store::ConflictStore;
pub use connection::Database;
pub use entity_store::EntityStore;
pub use meta::SyncMetaStore;
