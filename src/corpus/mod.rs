//! Product catalog types and the parquet corpus loader.

pub mod entry;
pub mod loader;

pub use entry::{Entry, EntryId};
pub use loader::load_entries;
