//! Pyshift core — scanner, knowledge acquisition, transformers, migration
//! engine, risk scoring, and the patch store.
//!
//! The main entry point is [`engine::MigrationEngine`], which runs the
//! analyse → validate → persist flow for one library upgrade and later
//! applies the resulting session through the [`store::PatchStore`].

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod oracle;
pub mod progress;
pub mod risk;
pub mod scanner;
pub mod store;
pub mod transform;
pub mod types;
