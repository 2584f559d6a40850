//! # codemend
//!
//! Indexes a hosted repository into a chunk store and drives a
//! retrieval-augmented edit pipeline over it: a natural-language task
//! becomes relevant files, proposed edits, verified edits, and finally a
//! branch, commit and pull request.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐
//! │ Indexer  │──▶│ Retrieve │──▶│  Propose  │──▶│  Verify  │──▶│  Patch   │
//! │ chunk+FTS│   │ rebuild  │   │ LLM+tools │   │ LLM veto │   │ git + PR │
//! └──────────┘   └──────────┘   └───────────┘   └──────────┘   └──────────┘
//! ```
//!
//! Algorithms and capability traits live in `codemend-core`; this crate
//! supplies SQLite, OpenAI-compatible and GitHub implementations plus the
//! `codemend` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite index store and revision ledger |
//! | [`github`] | GitHub repository host |
//! | [`llm`] | OpenAI-compatible language model |
//! | [`ingest`] | Indexing orchestration |
//! | [`retrieve`] | Retrieval agent |
//! | [`agents`] | Edit proposal and verification agents |
//! | [`git`] | Timed git subprocess runner |
//! | [`patch`] | Patch application and pull requests |
//! | [`pipeline`] | End-to-end pipeline |
//! | [`error`] | Stage and patch error types |

pub mod agents;
pub mod config;
pub mod db;
pub mod error;
pub mod git;
pub mod github;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod patch;
pub mod pipeline;
pub mod retrieve;
pub mod sqlite_store;
