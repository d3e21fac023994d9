//! Ingestion, chunking, embedding, persistence, and hybrid-retrieval engine.
//!
//! Architecture:
//!
//! ```text
//! gateway --> normalize --> extract --> chunk --> embedder --> persistence
//!                                                                  ^
//!                                        orchestrator (state machine) --+
//!                                                                       |
//!                                        bus (task queue bridge) -------+
//!
//! classifier --> retriever --> refinement --> fuser --> answer
//! ```
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`config`] | Typed configuration, loaded from TOML |
//! | [`errors`] | The `CoreError` taxonomy shared across every module |
//! | [`models`] | Persisted and in-flight data shapes |
//! | [`db`] | Postgres connection pool setup |
//! | [`migrate`] | Schema bootstrap (pgvector extension, tables, indexes) |
//! | [`persistence`] | The one place that talks to Postgres |
//! | [`gateway`] | Object-store fetch/upload contract |
//! | [`normalize`] | Format normalisation ahead of extraction |
//! | [`extract`] | PDF (via generative model) and URL (via scraper) extraction |
//! | [`chunk`] | Default, whitespace, and structure-aware chunking strategies |
//! | [`embedder`] | Token-budget batching on top of [`embedding`] |
//! | [`embedding`] | Embedding provider abstraction (OpenAI/Ollama/local) |
//! | [`orchestrator`] | The ingest state machine |
//! | [`bus`] | In-process task queue bridge |
//! | [`reducer`] | 3D dimensionality reduction job |
//! | [`classifier`] | Query tagging |
//! | [`retriever`] | Per-tag retrieval strategies |
//! | [`refinement`] | Bounded iterative context-enrichment agent |
//! | [`fuser`] | Reciprocal rank fusion |
//! | [`answer`] | Final answer assembly |
//! | [`server`] | Axum HTTP surface |

pub mod answer;
pub mod bus;
pub mod chunk;
pub mod classifier;
pub mod config;
pub mod db;
pub mod embedder;
pub mod embedding;
pub mod errors;
pub mod extract;
pub mod fuser;
pub mod gateway;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod persistence;
pub mod reducer;
pub mod refinement;
pub mod retriever;
pub mod server;
