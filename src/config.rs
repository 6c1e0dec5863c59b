use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use newsdesk_core::extract::ExtractionSettings;
use newsdesk_core::impact::SectorBand;
use newsdesk_core::query::RankingWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub impact: ImpactConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub symbols: SymbolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub cross_batch_check: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            cross_batch_check: false,
        }
    }
}

fn default_similarity_threshold() -> f32 {
    newsdesk_core::dedup::DEFAULT_SIMILARITY_THRESHOLD
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_pattern_bonus")]
    pub pattern_bonus: f64,
    #[serde(default = "default_ner_confidence")]
    pub default_ner_confidence: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            pattern_bonus: default_pattern_bonus(),
            default_ner_confidence: default_ner_confidence(),
        }
    }
}

impl ExtractionConfig {
    pub fn settings(&self) -> ExtractionSettings {
        ExtractionSettings {
            confidence_floor: self.confidence_floor,
            pattern_bonus: self.pattern_bonus,
            default_ner_confidence: self.default_ner_confidence,
        }
    }
}

fn default_confidence_floor() -> f64 {
    0.3
}
fn default_pattern_bonus() -> f64 {
    0.6
}
fn default_ner_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImpactConfig {
    #[serde(default = "default_sector_max")]
    pub sector_confidence_max: f64,
    #[serde(default = "default_sector_min")]
    pub sector_confidence_min: f64,
    #[serde(default = "default_sector_step")]
    pub sector_breadth_step: f64,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            sector_confidence_max: default_sector_max(),
            sector_confidence_min: default_sector_min(),
            sector_breadth_step: default_sector_step(),
        }
    }
}

impl ImpactConfig {
    pub fn band(&self) -> SectorBand {
        SectorBand {
            max: self.sector_confidence_max,
            min: self.sector_confidence_min,
            step: self.sector_breadth_step,
        }
    }
}

fn default_sector_max() -> f64 {
    0.8
}
fn default_sector_min() -> f64 {
    0.6
}
fn default_sector_step() -> f64 {
    0.05
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default = "default_match_weight")]
    pub match_weight: f64,
    #[serde(default = "default_confidence_weight")]
    pub confidence_weight: f64,
    #[serde(default)]
    pub thematic_min_similarity: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
            match_weight: default_match_weight(),
            confidence_weight: default_confidence_weight(),
            thematic_min_similarity: None,
        }
    }
}

impl RetrievalConfig {
    pub fn weights(&self) -> RankingWeights {
        RankingWeights {
            match_weight: self.match_weight,
            confidence_weight: self.confidence_weight,
            thematic_min_similarity: self.thematic_min_similarity,
        }
    }
}

fn default_final_limit() -> i64 {
    10
}
fn default_match_weight() -> f64 {
    0.6
}
fn default_confidence_weight() -> f64 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider (or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    /// Optional HTTP NER service.
    #[serde(default)]
    pub ner_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            ner_url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SymbolsConfig {
    /// TOML symbol table replacing the built-in Indian equities table.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let t = config.dedup.similarity_threshold;
    if !(t > 0.0 && t <= 1.0) {
        bail!("dedup.similarity_threshold must be in (0.0, 1.0]");
    }

    let ex = &config.extraction;
    for (name, v) in [
        ("extraction.confidence_floor", ex.confidence_floor),
        ("extraction.pattern_bonus", ex.pattern_bonus),
        ("extraction.default_ner_confidence", ex.default_ner_confidence),
    ] {
        if !(0.0..=1.0).contains(&v) {
            bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    let im = &config.impact;
    let (floor, ceiling) = (SectorBand::FLOOR, SectorBand::CEILING);
    if !(floor..=ceiling).contains(&im.sector_confidence_min)
        || !(floor..=ceiling).contains(&im.sector_confidence_max)
        || im.sector_confidence_min > im.sector_confidence_max
    {
        bail!(
            "impact.sector_confidence_min/max must satisfy {} <= min <= max <= {}",
            floor,
            ceiling
        );
    }
    if !(im.sector_breadth_step.is_finite() && im.sector_breadth_step >= 0.0) {
        bail!("impact.sector_breadth_step must be a finite number >= 0");
    }

    let r = &config.retrieval;
    if r.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if r.match_weight < 0.0 || r.confidence_weight < 0.0 {
        bail!("retrieval weights must be >= 0");
    }
    if r.match_weight + r.confidence_weight <= 0.0 {
        bail!("retrieval.match_weight and retrieval.confidence_weight cannot both be 0");
    }

    let m = &config.model;
    match m.provider.as_str() {
        "disabled" | "hashed" | "local" => {}
        "openai" | "ollama" => {
            if m.model.is_none() {
                bail!("model.model must be specified when provider is '{}'", m.provider);
            }
        }
        other => bail!(
            "Unknown model provider: '{}'. Must be disabled, hashed, openai, ollama, or local.",
            other
        ),
    }
    if m.is_enabled() && m.dims == Some(0) {
        bail!("model.dims must be > 0 when provider is '{}'", m.provider);
    }
    if m.timeout_secs == 0 {
        bail!("model.timeout_secs must be > 0");
    }

    Ok(())
}
