// Frost Kernel
//
// Table catalog core: versioned metadata, optimistic commits, scoped
// credential vending and purge on drop.

pub mod ident;
pub mod metadata;
pub mod row;
pub mod update;
pub mod invariants;
pub mod apply;
pub mod diff;
pub mod store;
pub mod storage;
pub mod credentials;
pub mod config;
pub mod manifest;
pub mod commit;
pub mod writer;
pub mod scan;
pub mod purge;
pub mod auth;
pub mod error;
pub mod catalog;
pub mod rest;

pub use catalog::{Catalog, LoadedTable, TableCreation};
pub use error::{CatalogError, ErrorKind};
