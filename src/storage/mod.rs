pub mod migrations;
pub mod store;
pub mod workflow;

pub use store::SqliteStore;
