//! Query-language filter engine and durable filter catalog.

pub mod ast;
pub mod catalog;
pub mod eval;
pub mod manager;
pub mod parser;

pub use catalog::{FilterCatalog, FilterDefinition, FilterKind, FilterSearch};
pub use manager::{FilterEngine, FilterOptions};
