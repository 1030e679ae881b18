//! Event, user, and experiment persistence. Analytics read from here; the
//! ingestion endpoints write here.

pub mod bucketing;
pub mod sqlite;
pub mod store;

pub use sqlite::SqliteStore;
pub use store::{AnalyticsStore, EventStore, ExperimentStore, UserStore};
