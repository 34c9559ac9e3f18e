//! Concrete collaborators: stores, the directory change source, and query
//! script handling.

pub mod directory;
pub mod memory_store;
pub mod query;
pub mod sqlite_store;
