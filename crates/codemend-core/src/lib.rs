//! # codemend core
//!
//! Shared, I/O-free logic for codemend: data models, overlapping chunking,
//! chunk reconstruction, and the capability traits the pipeline talks to
//! (index store, language model, version-control host).
//!
//! This crate contains no tokio, sqlx, subprocess, or filesystem I/O.
//! Concrete backends live in the `codemend` crate; in-memory fakes for
//! tests live in [`store::memory`] and [`tools`].

pub mod chunk;
pub mod error;
pub mod host;
pub mod llm;
pub mod models;
pub mod reconstruct;
pub mod store;
pub mod tools;
