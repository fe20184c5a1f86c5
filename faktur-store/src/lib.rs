//! Invoice store backends.
//!
//! Three interchangeable implementations of `faktur_core::InvoiceStore`:
//! pure in-memory, a JSON-array file with atomic replace, and SQLite.

pub mod json;
pub mod memory;
pub mod sqlite;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
