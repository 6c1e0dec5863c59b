//! Entity → stock impact mapping.
//!
//! | Entity    | Impact                                   | Confidence            |
//! |-----------|------------------------------------------|-----------------------|
//! | Company   | `Direct` on the company's symbol         | `1.0`                 |
//! | Sector    | `SectorWide` on every sector member      | [`SectorBand`]        |
//! | Regulator | `Regulatory` on each affected industry   | per-regulator setting |
//!
//! Person and event entities never map to a symbol. Names that do not
//! resolve are counted as misses and otherwise ignored.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Entity, EntityCategory, ImpactKind, StockImpact};
use crate::symbols::SymbolTable;

/// Confidence band for sector-wide impacts.
///
/// Breadth-dependent: the more symbols a sector has, the less each one is
/// assumed to move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorBand {
    pub max: f64,
    pub min: f64,
    /// Confidence lost per additional sector member.
    pub step: f64,
}

impl Default for SectorBand {
    fn default() -> Self {
        Self {
            max: 0.8,
            min: 0.6,
            step: 0.05,
        }
    }
}

impl SectorBand {
    /// Lowest confidence a sector-wide impact may carry.
    pub const FLOOR: f64 = 0.6;
    /// Highest confidence a sector-wide impact may carry.
    pub const CEILING: f64 = 0.8;

    /// Per-symbol confidence for a sector of `members` symbols.
    ///
    /// Always within `[FLOOR, CEILING]`, whatever the configured band.
    pub fn confidence_for(&self, members: usize) -> f64 {
        let max = bounded(self.max, Self::CEILING);
        let min = bounded(self.min, Self::FLOOR).min(max);
        let step = if self.step.is_finite() { self.step.max(0.0) } else { 0.0 };
        let extra = members.saturating_sub(1) as f64;
        (max - step * extra).clamp(min, max)
    }
}

/// `value` limited to the fixed sector range, or `fallback` when it is NaN.
fn bounded(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(SectorBand::FLOOR, SectorBand::CEILING)
    }
}

/// Impacts for one story plus the number of unresolved entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingOutcome {
    pub impacts: Vec<StockImpact>,
    pub misses: usize,
}

/// Maps extracted entities onto tradeable symbols.
#[derive(Debug, Clone)]
pub struct ImpactMapper {
    table: Arc<SymbolTable>,
    band: SectorBand,
}

impl ImpactMapper {
    pub fn new(table: Arc<SymbolTable>, band: SectorBand) -> Self {
        Self { table, band }
    }

    pub fn band(&self) -> &SectorBand {
        &self.band
    }

    pub fn map(&self, entities: &[Entity]) -> MappingOutcome {
        let mut best: HashMap<(String, ImpactKind, Option<String>), StockImpact> = HashMap::new();
        let mut misses = 0;

        let mut emit = |impact: StockImpact| {
            let key = (impact.symbol.clone(), impact.kind, impact.sector.clone());
            match best.get(&key) {
                Some(existing) if existing.confidence >= impact.confidence => {}
                _ => {
                    best.insert(key, impact);
                }
            }
        };

        for entity in entities {
            match entity.category {
                EntityCategory::Company => match self.table.resolve_company(&entity.name) {
                    Some(listing) => emit(StockImpact {
                        symbol: listing.symbol.clone(),
                        confidence: 1.0,
                        kind: ImpactKind::Direct,
                        source_entity: entity.name.clone(),
                        sector: Some(listing.sector.clone()),
                    }),
                    None => {
                        tracing::debug!(entity = %entity.name, "company did not resolve to a symbol");
                        misses += 1;
                    }
                },
                EntityCategory::Sector => {
                    let Some(sector) = self.table.resolve_sector(&entity.name) else {
                        tracing::debug!(entity = %entity.name, "unknown sector");
                        misses += 1;
                        continue;
                    };
                    let members = self.table.sector_members(&sector.name);
                    let confidence = self.band.confidence_for(members.len());
                    for symbol in members {
                        emit(StockImpact {
                            symbol: symbol.clone(),
                            confidence,
                            kind: ImpactKind::SectorWide,
                            source_entity: entity.name.clone(),
                            sector: Some(sector.name.clone()),
                        });
                    }
                }
                EntityCategory::Regulator => {
                    let Some(rule) = self.table.resolve_regulator(&entity.name) else {
                        tracing::debug!(entity = %entity.name, "unknown regulator");
                        misses += 1;
                        continue;
                    };
                    for industry in &rule.industries {
                        for symbol in self.table.sector_members(industry) {
                            emit(StockImpact {
                                symbol: symbol.clone(),
                                confidence: rule.confidence,
                                kind: ImpactKind::Regulatory,
                                source_entity: rule.name.clone(),
                                sector: Some(industry.clone()),
                            });
                        }
                    }
                }
                EntityCategory::Person | EntityCategory::Event => {}
            }
        }

        let mut impacts: Vec<StockImpact> = best.into_values().collect();
        impacts.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.sector.cmp(&b.sector))
        });

        MappingOutcome { impacts, misses }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    fn mapper() -> ImpactMapper {
        ImpactMapper::new(Arc::new(SymbolTable::indian_equities()), SectorBand::default())
    }

    fn entity(name: &str, category: EntityCategory) -> Entity {
        Entity {
            name: name.to_string(),
            mention: name.to_string(),
            category,
            confidence: 0.9,
            provenance: Provenance::Pattern {
                rule: format!("{}:{}", category, name),
            },
        }
    }

    #[test]
    fn test_company_maps_direct_at_full_confidence() {
        let out = mapper().map(&[entity("HDFC BANK LTD", EntityCategory::Company)]);
        assert_eq!(out.misses, 0);
        assert_eq!(out.impacts.len(), 1);
        let impact = &out.impacts[0];
        assert_eq!(impact.symbol, "HDFCBANK");
        assert_eq!(impact.kind, ImpactKind::Direct);
        assert_eq!(impact.confidence, 1.0);
        assert_eq!(impact.sector.as_deref(), Some("Banking"));
    }

    #[test]
    fn test_sector_confidence_within_band() {
        let m = mapper();
        for sector in ["Banking", "IT", "Telecom", "Financial Services", "Energy"] {
            let out = m.map(&[entity(sector, EntityCategory::Sector)]);
            assert!(!out.impacts.is_empty(), "{}", sector);
            for impact in &out.impacts {
                assert_eq!(impact.kind, ImpactKind::SectorWide);
                assert!((0.6..=0.8).contains(&impact.confidence), "{:?}", impact);
            }
        }
    }

    #[test]
    fn test_band_narrows_with_breadth() {
        let band = SectorBand::default();
        assert_eq!(band.confidence_for(1), 0.8);
        assert!(band.confidence_for(3) < band.confidence_for(2));
        assert_eq!(band.confidence_for(100), 0.6);
        assert_eq!(band.confidence_for(0), 0.8);
    }

    #[test]
    fn test_out_of_range_band_is_held_to_fixed_range() {
        let wide = SectorBand {
            max: 1.0,
            min: 0.1,
            step: 0.05,
        };
        assert_eq!(wide.confidence_for(1), 0.8);
        assert_eq!(wide.confidence_for(20), 0.6);

        let broken = SectorBand {
            max: f64::NAN,
            min: 0.7,
            step: f64::NAN,
        };
        assert_eq!(broken.confidence_for(1), 0.8);
        assert_eq!(broken.confidence_for(9), 0.8);

        let inverted = SectorBand {
            max: 0.65,
            min: 0.75,
            step: 0.05,
        };
        assert_eq!(inverted.confidence_for(3), 0.65);
    }

    #[test]
    fn test_regulator_uses_configured_confidence() {
        let out = mapper().map(&[entity("RBI", EntityCategory::Regulator)]);
        assert!(!out.impacts.is_empty());
        for impact in &out.impacts {
            assert_eq!(impact.kind, ImpactKind::Regulatory);
            assert_eq!(impact.confidence, 0.8);
            assert_eq!(impact.source_entity, "RBI");
        }
        // Banking and Financial Services both tag the five banks.
        let tagged: Vec<_> = out.impacts.iter().filter(|i| i.symbol == "SBIN").collect();
        assert_eq!(tagged.len(), 2);
    }

    #[test]
    fn test_regulator_without_industries_emits_nothing() {
        let out = mapper().map(&[entity("NSE", EntityCategory::Regulator)]);
        assert!(out.impacts.is_empty());
        assert_eq!(out.misses, 0);
    }

    #[test]
    fn test_unresolved_names_counted_not_raised() {
        let out = mapper().map(&[
            entity("Acme Widgets", EntityCategory::Company),
            entity("Shipping", EntityCategory::Sector),
            entity("FCA", EntityCategory::Regulator),
            entity("Shaktikanta Das", EntityCategory::Person),
        ]);
        assert!(out.impacts.is_empty());
        assert_eq!(out.misses, 3);
    }

    #[test]
    fn test_duplicate_impacts_keep_highest_confidence() {
        let out = mapper().map(&[
            entity("HDFC Bank", EntityCategory::Company),
            entity("HDFC", EntityCategory::Company),
            entity("Banking", EntityCategory::Sector),
        ]);
        let direct: Vec<_> = out.impacts.iter().filter(|i| i.kind == ImpactKind::Direct).collect();
        assert_eq!(direct.len(), 1);
        let sector: Vec<_> = out.impacts.iter().filter(|i| i.kind == ImpactKind::SectorWide).collect();
        assert_eq!(sector.len(), 5);
        assert_eq!(out.impacts[0].kind, ImpactKind::Direct);
    }
}
