//! # Proposal Index
//!
//! Turns a directory of heterogeneous office documents (PDF, Word, slides,
//! spreadsheets, plain text) into a persistent, queryable vector index.
//!
//! Each file is loaded by the loader registered for its extension, split
//! into overlapping fixed-size passages, embedded in cross-file batches,
//! and upserted under a stable identifier into a named collection.
//! Re-running over an unchanged directory leaves the index unchanged.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────┐   ┌───────────┐   ┌──────────────┐
//! │ Source dir  │──▶│  Loaders  │──▶│  Chunker  │──▶│  Embedding   │
//! │ (scan)      │   │ PDF/Office│   │ size/over │   │  provider    │
//! └─────────────┘   └───────────┘   └───────────┘   └──────┬───────┘
//!                                                          ▼
//!                                                   ┌──────────────┐
//!                                                   │ Vector store │
//!                                                   │  (SQLite)    │
//!                                                   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pidx init                         # create directories and the index
//! pidx ingest                       # index ./data/proposal-documents
//! pidx query "delivery schedule"    # nearest passages
//! pidx stats                        # what is indexed
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`scan`] | Source directory listing |
//! | [`extract`] | PDF and OOXML text extraction |
//! | [`loader`] | Extension → loader registry |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index store abstraction and backends |
//! | [`ingest`] | Ingestion pipeline |
//! | [`query`] | Similarity queries |
//! | [`stats`] | Collection statistics |
//! | [`progress`] | Progress reporting |
//! | [`logging`] | Tracing setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod query;
pub mod scan;
pub mod stats;
pub mod store;
