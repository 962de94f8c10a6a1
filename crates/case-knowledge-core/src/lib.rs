//! # Case Knowledge Core
//!
//! Portable logic for the case knowledge pipeline: the case data model,
//! the error taxonomy, document chunking, collaborator traits (embedding,
//! transcription, captioning, completion), storage traits for the vector
//! index, the relational registry and object storage, plus prompt
//! assembly and lenient parsing of model output.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Every storage trait ships with an in-memory implementation used by
//! tests and by embedders that do not need persistence.

pub mod blob;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod models;
pub mod provider;
pub mod registry;
pub mod store;
pub mod tasks;

pub use error::CaseError;
