//! Location samples: table schema, storage, validation and ingestion.

pub mod handlers;
pub mod ingest;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod schema;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod fixtures;
