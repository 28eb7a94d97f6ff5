//! # Novel Lens Core
//!
//! Runtime-free logic for Novel Lens: the data model, raw → canonical
//! identifier mapping, canonical-id validation, legacy record migration,
//! prompt and output-schema construction, and the key-value store trait.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem I/O. The
//! network- and storage-bound pieces live in the `novel-lens` crate and
//! build on the types defined here.

pub mod legacy;
pub mod mapping;
pub mod models;
pub mod prompt;
pub mod reviews;
pub mod schema;
pub mod store;
