//! Entity extraction: model NER spans merged with dictionary pattern rules.
//!
//! Two sources propose candidate mentions for a story's text:
//!
//! - the NER collaborator ([`ModelProvider::extract_entities`]), whose
//!   generic labels (`ORG`, `PERSON`, `EVENT`) map onto [`EntityCategory`];
//! - [`PatternRules`], one word-bounded regex per dictionary phrase in the
//!   [`SymbolTable`] (company names and aliases, sector keywords, regulator
//!   acronyms).
//!
//! Candidates on the same span are combined. Overlapping spans keep the
//! longer one, and the pattern candidate on a tie. When a dictionary entry
//! matches, its category and canonical name override the model's label.
//!
//! Confidence is the model's score (or a default when the model gives none)
//! plus a fixed bonus when a pattern fired, capped at `1.0`. Entities below
//! the floor are dropped and the rest are deduplicated by category and
//! normalised name, so the output is a deterministic function of the text.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;

use crate::error::PipelineError;
use crate::models::{Entity, EntityCategory, Provenance, RecognizedSpan};
use crate::provider::ModelProvider;
use crate::symbols::{normalize_name, SymbolTable};

/// Tunable confidence parameters for [`EntityExtractor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionSettings {
    /// Entities whose combined confidence is below this are dropped.
    pub confidence_floor: f64,
    /// Added to the model confidence when a pattern rule matched the span.
    pub pattern_bonus: f64,
    /// Used when the NER model reports a span without a score.
    pub default_ner_confidence: f64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            confidence_floor: 0.3,
            pattern_bonus: 0.6,
            default_ner_confidence: 0.5,
        }
    }
}

/// One compiled dictionary phrase.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub category: EntityCategory,
    pub canonical: String,
    /// Rule identifier recorded in [`Provenance`], e.g. `regulator:Reserve Bank of India`.
    pub rule: String,
    regex: Regex,
}

/// Dictionary rules compiled from a [`SymbolTable`], longest phrase first.
#[derive(Debug, Clone)]
pub struct PatternRules {
    rules: Vec<PatternRule>,
    table: Arc<SymbolTable>,
}

impl PatternRules {
    /// Compile one rule per distinct dictionary phrase in the table.
    pub fn from_table(table: Arc<SymbolTable>) -> Result<Self> {
        let mut phrases = table.dictionary_phrases();
        phrases.sort_by(|a, b| b.phrase.len().cmp(&a.phrase.len()).then(a.phrase.cmp(b.phrase)));

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(phrases.len());
        for p in phrases {
            let trimmed = p.phrase.trim();
            if trimmed.is_empty() {
                continue;
            }
            let key = if p.case_sensitive {
                (p.category, trimmed.to_string(), true)
            } else {
                (p.category, trimmed.to_lowercase(), false)
            };
            if !seen.insert(key) {
                continue;
            }
            let regex = phrase_regex(trimmed, p.case_sensitive)
                .with_context(|| format!("invalid dictionary phrase: '{}'", trimmed))?;
            rules.push(PatternRule {
                category: p.category,
                canonical: p.canonical.to_string(),
                rule: format!("{}:{}", p.category, trimmed),
                regex,
            });
        }

        Ok(Self { rules, table })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn table(&self) -> &Arc<SymbolTable> {
        &self.table
    }

    /// Dictionary category and canonical name for a free-standing name.
    ///
    /// Regulators are tried first, then companies, then sectors.
    pub fn resolve(&self, name: &str) -> Option<(EntityCategory, String)> {
        if let Some(r) = self.table.resolve_regulator(name) {
            return Some((EntityCategory::Regulator, r.name.clone()));
        }
        if let Some(c) = self.table.resolve_company(name) {
            return Some((EntityCategory::Company, c.name.clone()));
        }
        self.table
            .resolve_sector(name)
            .map(|s| (EntityCategory::Sector, s.name.clone()))
    }

    fn scan(&self, text: &str) -> Vec<Candidate> {
        let mut out = Vec::new();
        for rule in &self.rules {
            for m in rule.regex.find_iter(text) {
                out.push(Candidate {
                    start: m.start(),
                    end: m.end(),
                    mention: m.as_str().to_string(),
                    category: rule.category,
                    name: rule.canonical.clone(),
                    ner: None,
                    rule: Some(rule.rule.clone()),
                });
            }
        }
        out
    }
}

fn phrase_regex(phrase: &str, case_sensitive: bool) -> Result<Regex> {
    let body = regex::escape(phrase).replace(' ', r"\s+");
    let lead = if phrase.starts_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
    let trail = if phrase.ends_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
    let flags = if case_sensitive { "" } else { "(?i)" };
    Ok(Regex::new(&format!("{}{}{}{}", flags, lead, body, trail))?)
}

/// Map a generic NER label onto a category. Unknown labels are ignored.
fn category_for_label(label: &str) -> Option<EntityCategory> {
    match label.to_ascii_uppercase().as_str() {
        "ORG" | "ORGANIZATION" | "ORGANISATION" => Some(EntityCategory::Company),
        "PERSON" | "PER" => Some(EntityCategory::Person),
        "EVENT" => Some(EntityCategory::Event),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    start: usize,
    end: usize,
    mention: String,
    category: EntityCategory,
    name: String,
    /// Model label and confidence, when NER fired on this span.
    ner: Option<(String, f64)>,
    /// Pattern rule identifier, when a dictionary rule fired.
    rule: Option<String>,
}

impl Candidate {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn overlaps(&self, other: &Candidate) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn same_span(&self, other: &Candidate) -> bool {
        self.start == other.start && self.end == other.end
    }

    fn same_entity(&self, other: &Candidate) -> bool {
        self.category == other.category && self.name == other.name
    }

    /// Two dictionary readings of one phrase, e.g. a word that is both a
    /// company alias and a sector keyword. Both are kept.
    fn is_alternative_to(&self, other: &Candidate) -> bool {
        self.same_span(other) && self.rule.is_some() && other.rule.is_some() && !self.same_entity(other)
    }

    /// Fold a candidate on the same span (or absorbed by this one) into self.
    fn absorb(&mut self, other: Candidate) {
        if self.rule.is_none() {
            if let Some(rule) = other.rule {
                self.rule = Some(rule);
                self.category = other.category;
                self.name = other.name;
            }
        }
        if self.ner.is_none() {
            self.ner = other.ner;
        }
    }

    fn confidence(&self, settings: &ExtractionSettings) -> f64 {
        let model = self.ner.as_ref().map(|(_, c)| *c).unwrap_or(0.0);
        let bonus = if self.rule.is_some() { settings.pattern_bonus } else { 0.0 };
        (model + bonus).clamp(0.0, 1.0)
    }

    fn provenance(&self) -> Provenance {
        match (&self.ner, &self.rule) {
            (Some((label, _)), Some(rule)) => Provenance::Both {
                label: label.clone(),
                rule: rule.clone(),
            },
            (Some((label, _)), None) => Provenance::Model { label: label.clone() },
            (None, Some(rule)) => Provenance::Pattern { rule: rule.clone() },
            (None, None) => Provenance::Model {
                label: String::new(),
            },
        }
    }
}

/// Merges NER output with dictionary rules into scored entities.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    rules: PatternRules,
    settings: ExtractionSettings,
}

impl EntityExtractor {
    pub fn new(rules: PatternRules, settings: ExtractionSettings) -> Self {
        Self { rules, settings }
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    pub fn rules(&self) -> &PatternRules {
        &self.rules
    }

    /// Run the NER collaborator over `text` and merge its spans with the
    /// dictionary rules.
    ///
    /// A provider error is returned as [`PipelineError::ProviderFailure`]
    /// tagged with `item_id`; callers treat it as "no entities".
    pub async fn extract<P>(&self, provider: &P, item_id: &str, text: &str) -> Result<Vec<Entity>, PipelineError>
    where
        P: ModelProvider + ?Sized,
    {
        let spans = provider
            .extract_entities(text)
            .await
            .map_err(|e| PipelineError::provider(item_id, e))?;
        Ok(self.extract_with_spans(text, &spans))
    }

    /// Merge already-recognised spans with the dictionary rules.
    pub fn extract_with_spans(&self, text: &str, spans: &[RecognizedSpan]) -> Vec<Entity> {
        // One candidate per (span, category, canonical name). A model span
        // joins the matching dictionary reading, or the first one on its span.
        let mut merged: Vec<Candidate> = Vec::new();
        let mut by_span: HashMap<(usize, usize), Vec<usize>> = HashMap::new();

        let model_candidates = spans.iter().filter_map(|s| self.model_candidate(text, s));
        for cand in self.rules.scan(text).into_iter().chain(model_candidates) {
            let slots = by_span.entry((cand.start, cand.end)).or_default();
            let slot = slots
                .iter()
                .copied()
                .find(|&i| merged[i].same_entity(&cand))
                .or_else(|| slots.first().copied().filter(|_| cand.rule.is_none()));
            match slot {
                Some(i) => merged[i].absorb(cand),
                None => {
                    slots.push(merged.len());
                    merged.push(cand);
                }
            }
        }

        // Longest span first; on equal length a pattern candidate wins.
        merged.sort_by(|a, b| {
            b.len()
                .cmp(&a.len())
                .then(b.rule.is_some().cmp(&a.rule.is_some()))
                .then(a.start.cmp(&b.start))
        });
        let mut accepted: Vec<Candidate> = Vec::new();
        for cand in merged {
            match accepted
                .iter_mut()
                .find(|a| a.overlaps(&cand) && !a.is_alternative_to(&cand))
            {
                Some(winner) => {
                    if winner.same_entity(&cand) {
                        winner.absorb(cand);
                    }
                }
                None => accepted.push(cand),
            }
        }
        accepted.sort_by_key(|c| c.start);

        let mut best: BTreeMap<(EntityCategory, String), Entity> = BTreeMap::new();
        for cand in accepted {
            let confidence = cand.confidence(&self.settings);
            let key = (cand.category, normalize_name(&cand.name));
            let keep = best.get(&key).map_or(true, |e| confidence > e.confidence);
            if keep {
                best.insert(
                    key,
                    Entity {
                        provenance: cand.provenance(),
                        name: cand.name,
                        mention: cand.mention,
                        category: cand.category,
                        confidence,
                    },
                );
            }
        }

        best.into_values()
            .filter(|e| e.confidence >= self.settings.confidence_floor)
            .collect()
    }

    fn model_candidate(&self, text: &str, span: &RecognizedSpan) -> Option<Candidate> {
        let (start, end) = locate(text, span)?;
        let mention = text[start..end].to_string();
        let confidence = span
            .confidence
            .unwrap_or(self.settings.default_ner_confidence)
            .clamp(0.0, 1.0);

        let (category, name) = match self.rules.resolve(&mention) {
            Some(hit) => hit,
            None => (category_for_label(&span.label)?, mention.trim().to_string()),
        };

        Some(Candidate {
            start,
            end,
            mention,
            category,
            name,
            ner: Some((span.label.clone(), confidence)),
            rule: None,
        })
    }
}

/// Byte range of a span in `text`, falling back to a search for the span
/// text when the reported offsets are unusable.
fn locate(text: &str, span: &RecognizedSpan) -> Option<(usize, usize)> {
    if span.start < span.end {
        if let Some(slice) = text.get(span.start..span.end) {
            if span.text.is_empty() || slice == span.text {
                return Some((span.start, span.end));
            }
        }
    }
    let needle = span.text.trim();
    if needle.is_empty() {
        return None;
    }
    text.find(needle).map(|start| (start, start + needle.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stub::{span_in, StubProvider};
    use crate::symbols::{CompanyListing, SectorDefinition};

    fn extractor() -> EntityExtractor {
        let rules = PatternRules::from_table(Arc::new(SymbolTable::indian_equities())).unwrap();
        EntityExtractor::new(rules, ExtractionSettings::default())
    }

    fn find<'a>(entities: &'a [Entity], name: &str) -> Option<&'a Entity> {
        entities.iter().find(|e| e.name == name)
    }

    #[test]
    fn test_pattern_rules_find_regulator_and_company() {
        let text = "RBI increases repo rate; HDFC Bank shares fall.";
        let entities = extractor().extract_with_spans(text, &[]);

        let rbi = find(&entities, "RBI").unwrap();
        assert_eq!(rbi.category, EntityCategory::Regulator);
        assert!((rbi.confidence - 0.6).abs() < 1e-9);
        assert!(matches!(rbi.provenance, Provenance::Pattern { .. }));

        let hdfc = find(&entities, "HDFC Bank").unwrap();
        assert_eq!(hdfc.category, EntityCategory::Company);
        assert_eq!(hdfc.mention, "HDFC Bank");
    }

    #[test]
    fn test_dictionary_category_beats_model_label() {
        let text = "The Reserve Bank of India kept rates unchanged.";
        let spans = vec![span_in(text, "Reserve Bank of India", "ORG", 0.9)];
        let entities = extractor().extract_with_spans(text, &spans);

        assert_eq!(entities.len(), 1);
        let rbi = &entities[0];
        assert_eq!(rbi.category, EntityCategory::Regulator);
        assert_eq!(rbi.name, "RBI");
        assert!((rbi.confidence - 1.0).abs() < 1e-9);
        assert!(matches!(rbi.provenance, Provenance::Both { .. }));
    }

    #[test]
    fn test_longer_span_wins_overlap() {
        // "Reserve Bank" and "Reserve Bank of India" both match; only the longer survives.
        let text = "Reserve Bank of India hikes repo rate";
        let entities = extractor().extract_with_spans(text, &[]);
        let regulators: Vec<_> = entities
            .iter()
            .filter(|e| e.category == EntityCategory::Regulator)
            .collect();
        assert_eq!(regulators.len(), 1);
        assert_eq!(regulators[0].mention, "Reserve Bank of India");
    }

    #[test]
    fn test_longer_model_span_absorbs_pattern() {
        let text = "HDFC BANK LTD reported quarterly profit.";
        let spans = vec![span_in(text, "HDFC BANK LTD", "ORG", 0.7)];
        let entities = extractor().extract_with_spans(text, &spans);

        let hdfc = find(&entities, "HDFC Bank").unwrap();
        assert_eq!(hdfc.mention, "HDFC BANK LTD");
        assert!(hdfc.provenance.has_pattern());
        assert!((hdfc.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_model_entities_dropped() {
        let text = "Shaktikanta Das spoke at Mumbai Summit.";
        let spans = vec![
            span_in(text, "Shaktikanta Das", "PERSON", 0.25),
            span_in(text, "Mumbai Summit", "EVENT", 0.8),
            span_in(text, "Mumbai", "GPE", 0.99),
        ];
        let entities = extractor().extract_with_spans(text, &spans);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].category, EntityCategory::Event);
        assert_eq!(entities[0].name, "Mumbai Summit");
    }

    #[test]
    fn test_missing_model_score_uses_default() {
        let text = "Acme Widgets expands.";
        let mut span = span_in(text, "Acme Widgets", "ORG", 0.0);
        span.confidence = None;
        let entities = extractor().extract_with_spans(text, &[span]);
        assert_eq!(entities.len(), 1);
        assert!((entities[0].confidence - 0.5).abs() < 1e-9);
        assert_eq!(entities[0].category, EntityCategory::Company);
    }

    #[test]
    fn test_repeated_mentions_deduplicated() {
        let text = "RBI said... the Reserve Bank of India also said... RBI again.";
        let entities = extractor().extract_with_spans(text, &[]);
        let count = entities.iter().filter(|e| e.name == "RBI").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_pronoun_it_is_not_a_sector() {
        let text = "Analysts said it was a surprise for the IT sector.";
        let entities = extractor().extract_with_spans(text, &[]);
        let it: Vec<_> = entities.iter().filter(|e| e.name == "IT").collect();
        assert_eq!(it.len(), 1);
        assert_eq!(it[0].mention, "IT sector");
    }

    #[test]
    fn test_bad_offsets_fall_back_to_search() {
        let text = "Infosys wins a large deal.";
        let span = RecognizedSpan {
            text: "Infosys".into(),
            label: "ORG".into(),
            start: 40,
            end: 47,
            confidence: Some(0.8),
        };
        let entities = extractor().extract_with_spans(text, &[span]);
        assert_eq!(find(&entities, "Infosys").unwrap().mention, "Infosys");
    }

    #[tokio::test]
    async fn test_extraction_is_idempotent() {
        let text = "RBI hikes repo rate; banking sector and HDFC Bank react.";
        let provider = StubProvider::new().with_spans("RBI", vec![span_in(text, "HDFC Bank", "ORG", 0.8)]);
        let ex = extractor();
        let first = ex.extract(&provider, "s1", text).await.unwrap();
        let second = ex.extract(&provider, "s1", text).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn test_ner_failure_is_provider_failure() {
        let provider = StubProvider::new().failing_ner_for("");
        let err = extractor().extract(&provider, "s9", "RBI hikes").await.unwrap_err();
        assert!(matches!(err, PipelineError::ProviderFailure { ref item_id, .. } if item_id == "s9"));
    }

    #[test]
    fn test_phrase_with_two_dictionary_readings_keeps_both() {
        let table = SymbolTable::new(
            vec![CompanyListing {
                name: "Infra Corp".into(),
                symbol: "INFRACORP".into(),
                sector: "Infrastructure".into(),
                aliases: vec!["Infra".into()],
            }],
            vec![SectorDefinition {
                name: "Infrastructure".into(),
                keywords: vec!["infra".into()],
                members: vec![],
            }],
            vec![],
        )
        .unwrap();
        let rules = PatternRules::from_table(Arc::new(table)).unwrap();
        let ex = EntityExtractor::new(rules, ExtractionSettings::default());

        let text = "Infra shares rallied on Monday.";
        let spans = vec![span_in(text, "Infra", "ORG", 0.3)];
        let entities = ex.extract_with_spans(text, &spans);

        assert_eq!(entities.len(), 2, "{:?}", entities);
        let company = find(&entities, "Infra Corp").unwrap();
        assert_eq!(company.category, EntityCategory::Company);
        assert!(matches!(company.provenance, Provenance::Both { .. }));
        let sector = find(&entities, "Infrastructure").unwrap();
        assert_eq!(sector.category, EntityCategory::Sector);
        assert_eq!(sector.mention, "Infra");
    }

    #[test]
    fn test_rules_deduplicate_phrases() {
        let rules = PatternRules::from_table(Arc::new(SymbolTable::indian_equities())).unwrap();
        let telecom = rules
            .rules
            .iter()
            .filter(|r| r.rule.to_lowercase() == "sector:telecom")
            .count();
        assert_eq!(telecom, 1);
        let mut ids = HashSet::new();
        assert!(rules.rules.iter().all(|r| ids.insert(r.rule.clone())));
    }
}
