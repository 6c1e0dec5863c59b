//! # Newsdesk Core
//!
//! Runtime-agnostic logic for Newsdesk: data models, the stock symbol
//! table, near-duplicate grouping, entity extraction, impact mapping, the
//! context-expanding query engine, and the storage / model traits they run
//! against.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Storage and
//! the pretrained model are injected through the [`store::Store`] and
//! [`provider::ModelProvider`] traits; the `newsdesk` app crate supplies the
//! SQLite store and the concrete model clients.
//!
//! ```text
//! articles ─▶ dedup ─▶ extract ─▶ impact ─▶ Store
//!                                              │
//!            query text ─▶ extract ─▶ intent ─▶ expand ─▶ ranked stories
//! ```

pub mod dedup;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod impact;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod query;
pub mod store;
pub mod symbols;

pub use error::PipelineError;
pub use models::{
    Article, ConfidenceBucket, ConsolidatedStory, Entity, EntityCategory, ImpactKind, Provenance,
    RecognizedSpan, StockImpact,
};
pub use pipeline::{BatchReport, Pipeline};
pub use provider::ModelProvider;
pub use query::{QueryEngine, QueryIntent, QueryResponse, RankedStory};
pub use store::Store;
pub use symbols::SymbolTable;
