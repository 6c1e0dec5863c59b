//! # Newsdesk
//!
//! Financial news intelligence: folds near-duplicate articles into
//! consolidated stories, extracts companies, sectors and regulators, maps
//! them to affected stock symbols, and answers context-expanding queries.
//!
//! The domain logic lives in the `newsdesk-core` crate; this crate supplies
//! configuration, SQLite storage, concrete model clients and the `nd` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ JSON batch │──▶│ dedup → extract → impact │──▶│  SQLite  │
//! └────────────┘   └──────────────────────────┘   └────┬─────┘
//!                                                      │
//!                          ┌──────────┐                │
//!                          │ nd query │◀───────────────┘
//!                          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nd init                                  # create database
//! nd ingest ./articles.json                # fold, extract, map, store
//! nd query "HDFC Bank news"                # direct + sector-wide stories
//! nd query "RBI policy changes" --json
//! nd stock HDFCBANK                        # news for one ticker
//! nd entities                              # everything extracted so far
//! nd stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`provider`] | Embedding and NER clients |
//! | [`engine`] | Builds the pipeline and query engine from config |
//! | [`ingest`] | `nd ingest` |
//! | [`query`] | `nd query` |
//! | [`get`] | `nd get` |
//! | [`stock`] | `nd stock` |
//! | [`entities`] | `nd entities` |
//! | [`stats`] | `nd stats` |
//! | [`logging`] | tracing subscriber setup |

pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod provider;
pub mod query;
pub mod sqlite_store;
pub mod stats;
pub mod stock;
