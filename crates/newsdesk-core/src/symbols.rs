//! Static lookup tables: company → symbol, sector → symbols, regulator → industries.
//!
//! A [`SymbolTable`] is built once at start-up (either the built-in
//! [`SymbolTable::indian_equities`] table or one deserialised from a
//! [`SymbolTableFile`]) and shared immutably by the extractor, the impact
//! mapper, and the query engine.
//!
//! Name lookups go through [`normalize_name`]: case-folding, punctuation
//! removal, and corporate suffix stripping, so `"HDFC BANK LTD."` and
//! `"HDFC Bank"` resolve to the same listing.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::EntityCategory;

/// Corporate suffixes removed from the end of a normalised name.
const CORPORATE_SUFFIXES: &[&str] = &[
    "ltd",
    "limited",
    "inc",
    "corp",
    "corporation",
    "plc",
    "co",
    "pvt",
    "private",
];

/// A listed company and the names it is reported under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyListing {
    pub name: String,
    pub symbol: String,
    pub sector: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A sector: its keyword phrases and any constituents listed under another sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorDefinition {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Symbols belonging to this sector in addition to companies whose
    /// primary sector it is.
    #[serde(default)]
    pub members: Vec<String>,
}

/// Which industries a regulator's announcements move, and how strongly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatorRule {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    /// Confidence assigned to every regulatory impact from this regulator.
    pub confidence: f64,
}

/// On-disk shape of a symbol table (TOML or JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTableFile {
    #[serde(default)]
    pub companies: Vec<CompanyListing>,
    #[serde(default)]
    pub sectors: Vec<SectorDefinition>,
    #[serde(default)]
    pub regulators: Vec<RegulatorRule>,
}

/// One dictionary phrase the extractor turns into a pattern rule.
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryPhrase<'a> {
    pub category: EntityCategory,
    pub canonical: &'a str,
    pub phrase: &'a str,
    /// Acronyms and ticker symbols are matched case-sensitively; names are not.
    pub case_sensitive: bool,
}

/// Immutable company / sector / regulator lookup tables.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    companies: Vec<CompanyListing>,
    sectors: Vec<SectorDefinition>,
    regulators: Vec<RegulatorRule>,
    company_index: HashMap<String, usize>,
    symbol_index: HashMap<String, usize>,
    sector_index: HashMap<String, usize>,
    regulator_index: HashMap<String, usize>,
    sector_members: Vec<Vec<String>>,
}

/// Normalise an entity name for lookup.
///
/// Lower-cases, turns punctuation other than `&` into whitespace, collapses
/// runs of whitespace, and strips trailing corporate suffixes.
///
/// ```rust
/// use newsdesk_core::symbols::normalize_name;
///
/// assert_eq!(normalize_name("HDFC BANK LTD."), "hdfc bank");
/// assert_eq!(normalize_name("  Larsen & Toubro Limited "), "larsen & toubro");
/// ```
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '&' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    while tokens.len() > 1 {
        match tokens.last() {
            Some(last) if CORPORATE_SUFFIXES.contains(last) => {
                tokens.pop();
            }
            _ => break,
        }
    }
    tokens.join(" ")
}

/// Short all-caps tokens like `RBI`, `IT`, or `L&T`; matching these
/// case-insensitively would hit ordinary words ("it").
fn is_acronym(phrase: &str) -> bool {
    phrase.len() <= 10
        && !phrase.contains(char::is_whitespace)
        && phrase.chars().any(|c| c.is_ascii_uppercase())
        && !phrase.chars().any(|c| c.is_lowercase())
}

/// Fail when one normalised phrase belongs to two different owners.
fn ensure_unambiguous<'a>(phrases: impl Iterator<Item = (&'a str, &'a str)>) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for (phrase, owner) in phrases {
        if let Some(other) = seen.insert(normalize_name(phrase), owner) {
            if other != owner {
                bail!("name '{}' maps to both {} and {}", phrase, other, owner);
            }
        }
    }
    Ok(())
}

impl SymbolTable {
    /// Build a validated table.
    ///
    /// Fails if a company or regulator references an undeclared sector, if a
    /// regulator confidence lies outside `[0, 1]`, or if one name, alias or
    /// keyword belongs to two listings of the same kind.
    pub fn new(
        companies: Vec<CompanyListing>,
        sectors: Vec<SectorDefinition>,
        regulators: Vec<RegulatorRule>,
    ) -> Result<Self> {
        let declared: Vec<String> = sectors.iter().map(|s| normalize_name(&s.name)).collect();

        for c in &companies {
            if c.symbol.trim().is_empty() {
                bail!("company '{}' has an empty symbol", c.name);
            }
            if !declared.contains(&normalize_name(&c.sector)) {
                bail!(
                    "company '{}' references undeclared sector '{}'",
                    c.name,
                    c.sector
                );
            }
        }
        for r in &regulators {
            if !(0.0..=1.0).contains(&r.confidence) {
                bail!(
                    "regulator '{}' confidence must be in [0.0, 1.0], got {}",
                    r.name,
                    r.confidence
                );
            }
            for industry in &r.industries {
                if !declared.contains(&normalize_name(industry)) {
                    bail!(
                        "regulator '{}' references undeclared industry '{}'",
                        r.name,
                        industry
                    );
                }
            }
        }

        ensure_unambiguous(companies.iter().flat_map(|c| {
            std::iter::once(&c.name)
                .chain(c.aliases.iter())
                .map(move |n| (n.as_str(), c.symbol.as_str()))
        }))?;
        ensure_unambiguous(sectors.iter().flat_map(|s| {
            std::iter::once(&s.name)
                .chain(s.keywords.iter())
                .map(move |k| (k.as_str(), s.name.as_str()))
        }))?;
        ensure_unambiguous(regulators.iter().flat_map(|r| {
            std::iter::once(&r.name)
                .chain(r.aliases.iter())
                .map(move |a| (a.as_str(), r.name.as_str()))
        }))?;

        Ok(Self::build(companies, sectors, regulators))
    }

    /// Build a table from its file representation.
    pub fn from_file(file: SymbolTableFile) -> Result<Self> {
        Self::new(file.companies, file.sectors, file.regulators)
    }

    fn build(
        companies: Vec<CompanyListing>,
        sectors: Vec<SectorDefinition>,
        regulators: Vec<RegulatorRule>,
    ) -> Self {
        let mut company_index = HashMap::new();
        let mut symbol_index = HashMap::new();
        for (i, c) in companies.iter().enumerate() {
            company_index.entry(normalize_name(&c.name)).or_insert(i);
            for alias in &c.aliases {
                company_index.entry(normalize_name(alias)).or_insert(i);
            }
            symbol_index.entry(c.symbol.to_uppercase()).or_insert(i);
        }

        let mut sector_index = HashMap::new();
        for (i, s) in sectors.iter().enumerate() {
            sector_index.insert(normalize_name(&s.name), i);
            for kw in &s.keywords {
                sector_index.entry(normalize_name(kw)).or_insert(i);
            }
        }

        let sector_members = sectors
            .iter()
            .map(|s| {
                let key = normalize_name(&s.name);
                let mut members: Vec<String> = Vec::new();
                let primary = companies
                    .iter()
                    .filter(|c| normalize_name(&c.sector) == key)
                    .map(|c| c.symbol.clone());
                for sym in primary.chain(s.members.iter().cloned()) {
                    if !members.contains(&sym) {
                        members.push(sym);
                    }
                }
                members
            })
            .collect();

        let mut regulator_index = HashMap::new();
        for (i, r) in regulators.iter().enumerate() {
            regulator_index.insert(normalize_name(&r.name), i);
            for alias in &r.aliases {
                regulator_index.entry(normalize_name(alias)).or_insert(i);
            }
        }

        Self {
            companies,
            sectors,
            regulators,
            company_index,
            symbol_index,
            sector_index,
            regulator_index,
            sector_members,
        }
    }

    /// Resolve a company name, alias, or ticker symbol to its listing.
    pub fn resolve_company(&self, name: &str) -> Option<&CompanyListing> {
        self.company_index
            .get(&normalize_name(name))
            .or_else(|| self.symbol_index.get(&name.trim().to_uppercase()))
            .map(|&i| &self.companies[i])
    }

    /// Resolve a sector name or keyword phrase to its canonical definition.
    pub fn resolve_sector(&self, name: &str) -> Option<&SectorDefinition> {
        self.sector_index
            .get(&normalize_name(name))
            .map(|&i| &self.sectors[i])
    }

    /// Resolve a regulator name or alias to its rule.
    pub fn resolve_regulator(&self, name: &str) -> Option<&RegulatorRule> {
        self.regulator_index
            .get(&normalize_name(name))
            .map(|&i| &self.regulators[i])
    }

    /// All symbols belonging to a sector, primary listings first.
    pub fn sector_members(&self, sector: &str) -> &[String] {
        self.sector_index
            .get(&normalize_name(sector))
            .map(|&i| self.sector_members[i].as_slice())
            .unwrap_or(&[])
    }

    pub fn companies(&self) -> &[CompanyListing] {
        &self.companies
    }

    pub fn sectors(&self) -> &[SectorDefinition] {
        &self.sectors
    }

    pub fn regulators(&self) -> &[RegulatorRule] {
        &self.regulators
    }

    /// Every dictionary phrase, for building extraction rules.
    pub fn dictionary_phrases(&self) -> Vec<DictionaryPhrase<'_>> {
        let mut out = Vec::new();
        for c in &self.companies {
            for phrase in std::iter::once(&c.name).chain(c.aliases.iter()) {
                out.push(DictionaryPhrase {
                    category: EntityCategory::Company,
                    canonical: &c.name,
                    phrase,
                    case_sensitive: is_acronym(phrase),
                });
            }
            out.push(DictionaryPhrase {
                category: EntityCategory::Company,
                canonical: &c.name,
                phrase: &c.symbol,
                case_sensitive: is_acronym(&c.symbol),
            });
        }
        for s in &self.sectors {
            for phrase in std::iter::once(&s.name).chain(s.keywords.iter()) {
                out.push(DictionaryPhrase {
                    category: EntityCategory::Sector,
                    canonical: &s.name,
                    phrase,
                    case_sensitive: is_acronym(phrase),
                });
            }
        }
        for r in &self.regulators {
            for phrase in std::iter::once(&r.name).chain(r.aliases.iter()) {
                out.push(DictionaryPhrase {
                    category: EntityCategory::Regulator,
                    canonical: &r.name,
                    phrase,
                    case_sensitive: is_acronym(phrase),
                });
            }
        }
        out
    }

    /// The built-in table of large-cap Indian equities.
    pub fn indian_equities() -> Self {
        fn company(name: &str, symbol: &str, sector: &str, aliases: &[&str]) -> CompanyListing {
            CompanyListing {
                name: name.to_string(),
                symbol: symbol.to_string(),
                sector: sector.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            }
        }
        fn sector(name: &str, keywords: &[&str], members: &[&str]) -> SectorDefinition {
            SectorDefinition {
                name: name.to_string(),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                members: members.iter().map(|m| m.to_string()).collect(),
            }
        }
        fn regulator(name: &str, aliases: &[&str], industries: &[&str], confidence: f64) -> RegulatorRule {
            RegulatorRule {
                name: name.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                industries: industries.iter().map(|i| i.to_string()).collect(),
                confidence,
            }
        }

        let companies = vec![
            company("HDFC Bank", "HDFCBANK", "Banking", &["HDFC"]),
            company("ICICI Bank", "ICICIBANK", "Banking", &["ICICI"]),
            company("Axis Bank", "AXISBANK", "Banking", &[]),
            company("Kotak Mahindra Bank", "KOTAKBANK", "Banking", &["Kotak Bank", "Kotak"]),
            company("State Bank of India", "SBIN", "Banking", &["SBI"]),
            company("Tata Consultancy Services", "TCS", "IT", &["Tata Consultancy"]),
            company("Infosys", "INFY", "IT", &[]),
            company("Wipro", "WIPRO", "IT", &[]),
            company("HCL Technologies", "HCLTECH", "IT", &["HCL", "HCLTech"]),
            company("Reliance Industries", "RELIANCE", "Energy", &["Reliance", "RIL", "Reliance Jio", "Jio"]),
            company("Bharti Airtel", "BHARTIARTL", "Telecom", &["Airtel"]),
            company("Maruti Suzuki", "MARUTI", "Automobile", &["Maruti"]),
            company("Tata Motors", "TATAMOTORS", "Automobile", &[]),
            company("Larsen & Toubro", "LT", "Infrastructure", &["L&T"]),
            company("Sun Pharmaceutical", "SUNPHARMA", "Pharmaceutical", &["Sun Pharma"]),
            company("Adani Enterprises", "ADANIENT", "Infrastructure", &["Adani"]),
        ];

        let sectors = vec![
            sector("Banking", &["banking sector", "banks", "lenders", "bank stocks", "banking stocks"], &[]),
            sector(
                "Financial Services",
                &["financial services", "financial sector", "NBFC", "NBFCs"],
                &["HDFCBANK", "ICICIBANK", "AXISBANK", "KOTAKBANK", "SBIN"],
            ),
            sector("IT", &["IT sector", "IT services", "IT stocks", "information technology", "software services"], &[]),
            sector("Telecom", &["telecom sector", "telecommunications", "telecom"], &["RELIANCE"]),
            sector("Automobile", &["automobile sector", "auto sector", "automakers", "carmakers", "automobile"], &[]),
            sector("Pharmaceutical", &["pharma sector", "pharmaceutical", "drugmakers", "pharma"], &[]),
            sector("Infrastructure", &["infrastructure sector", "infrastructure", "construction"], &[]),
            sector("Energy", &["energy sector", "oil and gas", "refining"], &[]),
        ];

        let regulators = vec![
            regulator("RBI", &["Reserve Bank of India", "Reserve Bank"], &["Banking", "Financial Services"], 0.8),
            regulator("SEBI", &["Securities and Exchange Board of India"], &["Financial Services"], 0.5),
            regulator("TRAI", &["Telecom Regulatory Authority of India"], &["Telecom"], 0.7),
            regulator("NSE", &["National Stock Exchange"], &[], 0.5),
            regulator("BSE", &["Bombay Stock Exchange"], &[], 0.5),
        ];

        Self::build(companies, sectors, regulators)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::indian_equities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_suffixes_and_punctuation() {
        assert_eq!(normalize_name("HDFC BANK LTD"), "hdfc bank");
        assert_eq!(normalize_name("Infosys Ltd."), "infosys");
        assert_eq!(normalize_name("Reliance Industries Pvt. Ltd."), "reliance industries");
        assert_eq!(normalize_name("L&T"), "l&t");
        // A lone suffix token is kept rather than normalised away.
        assert_eq!(normalize_name("Co"), "co");
    }

    #[test]
    fn test_builtin_table_is_valid() {
        let t = SymbolTable::indian_equities();
        let file = SymbolTableFile {
            companies: t.companies().to_vec(),
            sectors: t.sectors().to_vec(),
            regulators: t.regulators().to_vec(),
        };
        assert!(SymbolTable::from_file(file).is_ok());
    }

    #[test]
    fn test_resolve_company_variants() {
        let t = SymbolTable::indian_equities();
        for name in ["HDFC Bank", "HDFC BANK LTD", "hdfc", "HDFCBANK"] {
            assert_eq!(t.resolve_company(name).map(|c| c.symbol.as_str()), Some("HDFCBANK"), "{}", name);
        }
        assert_eq!(t.resolve_company("L&T").map(|c| c.symbol.as_str()), Some("LT"));
        assert!(t.resolve_company("Acme Widgets").is_none());
    }

    #[test]
    fn test_sector_members_include_extra_members() {
        let t = SymbolTable::indian_equities();
        assert_eq!(t.sector_members("Banking").len(), 5);
        assert_eq!(t.sector_members("telecom"), &["BHARTIARTL".to_string(), "RELIANCE".to_string()]);
        assert!(t.sector_members("Shipping").is_empty());
    }

    #[test]
    fn test_acronyms_are_case_sensitive() {
        let t = SymbolTable::indian_equities();
        let phrases = t.dictionary_phrases();
        let it = phrases.iter().find(|p| p.phrase == "IT").unwrap();
        assert!(it.case_sensitive);
        let infosys = phrases.iter().find(|p| p.phrase == "Infosys").unwrap();
        assert!(!infosys.case_sensitive);
        assert!(is_acronym("L&T"));
        assert!(!is_acronym("NBFCs"));
    }

    #[test]
    fn test_resolve_sector_by_keyword() {
        let t = SymbolTable::indian_equities();
        assert_eq!(t.resolve_sector("banks").map(|s| s.name.as_str()), Some("Banking"));
        assert_eq!(t.resolve_sector("IT sector").map(|s| s.name.as_str()), Some("IT"));
    }

    #[test]
    fn test_resolve_regulator_alias() {
        let t = SymbolTable::indian_equities();
        let rbi = t.resolve_regulator("Reserve Bank of India").unwrap();
        assert_eq!(rbi.name, "RBI");
        assert_eq!(rbi.industries, vec!["Banking", "Financial Services"]);
    }

    #[test]
    fn test_new_rejects_undeclared_sector() {
        let err = SymbolTable::new(
            vec![CompanyListing {
                name: "Acme".into(),
                symbol: "ACME".into(),
                sector: "Widgets".into(),
                aliases: vec![],
            }],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("undeclared sector"));
    }

    #[test]
    fn test_new_rejects_ambiguous_alias() {
        let sectors = vec![SectorDefinition {
            name: "Banking".into(),
            keywords: vec![],
            members: vec![],
        }];
        let companies = vec![
            CompanyListing { name: "First Bank".into(), symbol: "FB".into(), sector: "Banking".into(), aliases: vec!["FBank".into()] },
            CompanyListing { name: "Federal Bank".into(), symbol: "FEDBNK".into(), sector: "Banking".into(), aliases: vec!["FBank".into()] },
        ];
        assert!(SymbolTable::new(companies, sectors, vec![]).is_err());
    }

    #[test]
    fn test_new_rejects_keyword_shared_by_two_sectors() {
        let sectors = vec![
            SectorDefinition { name: "Banking".into(), keywords: vec!["payments".into()], members: vec![] },
            SectorDefinition { name: "IT".into(), keywords: vec!["Payments".into()], members: vec![] },
        ];
        let err = SymbolTable::new(vec![], sectors, vec![]).unwrap_err();
        assert!(err.to_string().contains("maps to both Banking and IT"), "{}", err);
    }

    #[test]
    fn test_new_accepts_sector_keyword_repeating_its_name() {
        let sectors = vec![SectorDefinition {
            name: "Telecom".into(),
            keywords: vec!["telecom".into()],
            members: vec![],
        }];
        assert!(SymbolTable::new(vec![], sectors, vec![]).is_ok());
    }

    #[test]
    fn test_new_rejects_out_of_range_regulator_confidence() {
        let rule = RegulatorRule {
            name: "X".into(),
            aliases: vec![],
            industries: vec![],
            confidence: 1.5,
        };
        assert!(SymbolTable::new(vec![], vec![], vec![rule]).is_err());
    }
}
