//! Stock effects shipped with the engine.

pub mod catalog;

pub use catalog::{BUILTIN, CatalogEntry, builtin_ids, register_builtins};
