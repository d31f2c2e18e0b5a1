//! Time-series persistence for tag values: a bounded-channel writer, a batched background
//! flusher, range/latest queries, and retention cleanup, all backed by `rusqlite`.

mod store;

pub use store::{HistoryRecord, HistoryStore, StoreStats};
