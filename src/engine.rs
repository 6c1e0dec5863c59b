//! Wires configuration into the core engines.
//!
//! The symbol table is built once, shared behind an `Arc`, and handed to
//! the extractor, the impact mapper and the query engine.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use newsdesk_core::dedup::Deduplicator;
use newsdesk_core::extract::{EntityExtractor, PatternRules};
use newsdesk_core::impact::ImpactMapper;
use newsdesk_core::symbols::SymbolTableFile;
use newsdesk_core::{Pipeline, QueryEngine, SymbolTable};

use crate::config::Config;

/// Everything a command needs besides storage and the model client.
pub struct Engine {
    pub table: Arc<SymbolTable>,
    pub pipeline: Pipeline,
    pub query: QueryEngine,
}

impl Engine {
    pub fn from_config(config: &Config) -> Result<Self> {
        let table = Arc::new(load_symbols(config)?);
        let rules = PatternRules::from_table(table.clone())?;
        let extractor = EntityExtractor::new(rules, config.extraction.settings());

        let pipeline = Pipeline::new(
            Deduplicator::new(config.dedup.similarity_threshold),
            extractor.clone(),
            ImpactMapper::new(table.clone(), config.impact.band()),
        )
        .with_cross_batch_check(config.dedup.cross_batch_check);

        let query = QueryEngine::new(extractor, table.clone(), config.retrieval.weights());

        tracing::debug!(
            companies = table.companies().len(),
            sectors = table.sectors().len(),
            regulators = table.regulators().len(),
            "symbol table loaded"
        );

        Ok(Self {
            table,
            pipeline,
            query,
        })
    }
}

/// The configured symbol table, or the built-in Indian equities table.
pub fn load_symbols(config: &Config) -> Result<SymbolTable> {
    match &config.symbols.path {
        Some(path) => load_symbol_file(path),
        None => Ok(SymbolTable::indian_equities()),
    }
}

fn load_symbol_file(path: &Path) -> Result<SymbolTable> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read symbol table: {}", path.display()))?;
    let file: SymbolTableFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse symbol table: {}", path.display()))?;
    SymbolTable::from_file(file)
        .with_context(|| format!("Invalid symbol table: {}", path.display()))
}
