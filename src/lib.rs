//! # Case Knowledge
//!
//! Case-scoped knowledge pipeline for construction site records.
//!
//! Uploaded documents, audio notes and site photos are normalized into
//! text chunks, embedded, and indexed per case. Cases can be searched with
//! cited answers, and an LLM extracts actionable tasks from each case's
//! content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌─────────────────┐
//! │   Uploads    │──▶│ Normalizer │──▶│ Embedding       │
//! │ doc/audio/img│   │            │   │ Gateway         │
//! └──────────────┘   └────────────┘   └────────┬────────┘
//!                                              ▼
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ Case Registry│◀──│  Lifecycle   │──▶│  Knowledge   │
//!   │ (SQLite)     │   │ Coordinator  │   │  Store       │
//!   └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                             ▼                  ▼
//!                      ┌─────────────┐    ┌─────────────┐
//!                      │ Task Engine │    │ Retrieval   │
//!                      └─────────────┘    └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! casekb init
//! casekb case create --doc inspection.pdf --audio memo.m4a --image crack.jpg
//! casekb query "Where was rebar exposed?"
//! casekb case delete <case-id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite knowledge store |
//! | [`sqlite_registry`] | SQLite case registry |
//! | [`blob_fs`] | Filesystem object storage with signed URLs |
//! | [`extract`] | PDF/OOXML text extraction |
//! | [`http`] | Retry loop for AI provider calls |
//! | [`embedding`] | Embedding providers and gateway |
//! | [`openai`] | Completion, transcription and captioning clients |
//! | [`normalize`] | Content normalizer |
//! | [`retrieval`] | Retrieval engine |
//! | [`task_engine`] | Task extraction engine |
//! | [`lifecycle`] | Case creation and cascade deletion |
//! | [`query`] | Query capabilities and router |
//! | [`services`] | Service wiring |
//! | [`cli`] | Command implementations |

pub mod blob_fs;
pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod lifecycle;
pub mod migrate;
pub mod normalize;
pub mod openai;
pub mod query;
pub mod retrieval;
pub mod services;
pub mod sqlite_registry;
pub mod sqlite_store;
pub mod task_engine;
