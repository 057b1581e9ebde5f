//! duplex-state: deployment history log for Duplex.
//!
//! Backed by [redb](https://docs.rs/redb). Each successful deploy appends
//! a [`DeployRecord`]; reads come back newest first so the previous tag
//! is always one entry behind the current one. Retention is capped, the
//! oldest records fall off on append.
//!
//! The store is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and
//! supports an in-memory backend for tests.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{DeployHistory, HistoryStore};
pub use types::DeployRecord;
