// 🏷️ Brand Tables - Static retailer/brand table + ordered keyword patterns
//
// Both tables are built once at startup (defaults, CSV or JSON) and then
// shared read-only behind an Arc. Nothing in here mutates after load.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;

// ============================================================================
// STATIC BRAND / RETAILER TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Store name printed in a receipt header
    Retailer,

    /// Product brand printed on a line item
    Brand,
}

/// One row of the static table.
///
/// CSV layout: `keyword,ticker,company_name,category,kind,confidence`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandEntry {
    pub keyword: String,
    pub ticker: String,
    pub company_name: String,
    pub category: String,
    pub kind: EntryKind,
    pub confidence: f64,
}

impl BrandEntry {
    pub fn new(
        keyword: &str,
        ticker: &str,
        company_name: &str,
        category: &str,
        kind: EntryKind,
        confidence: f64,
    ) -> Self {
        BrandEntry {
            keyword: keyword.to_string(),
            ticker: ticker.to_string(),
            company_name: company_name.to_string(),
            category: category.to_string(),
            kind,
            confidence,
        }
    }
}

/// Immutable keyword → ticker table.
///
/// Entries are kept longest-keyword-first so that the first substring hit is
/// also the most specific one ("nike store" beats "nike").
#[derive(Debug, Clone)]
pub struct BrandTable {
    entries: Vec<BrandEntry>,
}

impl BrandTable {
    pub fn from_entries(entries: Vec<BrandEntry>) -> Self {
        let mut entries: Vec<BrandEntry> = entries
            .into_iter()
            .map(|mut entry| {
                entry.keyword = normalize_key(&entry.keyword);
                entry.ticker = entry.ticker.trim().to_uppercase();
                entry.confidence = entry.confidence.clamp(0.0, 1.0);
                entry
            })
            .filter(|entry| !entry.keyword.is_empty() && !entry.ticker.is_empty())
            .collect();

        entries.sort_by(|a, b| {
            b.keyword
                .len()
                .cmp(&a.keyword.len())
                .then_with(|| a.keyword.cmp(&b.keyword))
        });
        entries.dedup_by(|a, b| a.keyword == b.keyword);

        BrandTable { entries }
    }

    pub fn with_defaults() -> Self {
        let entries = DEFAULT_BRANDS
            .iter()
            .map(|(keyword, ticker, company, category, kind, confidence)| {
                BrandEntry::new(keyword, ticker, company, category, *kind, *confidence)
            })
            .collect();
        BrandTable::from_entries(entries)
    }

    /// Load table rows from a CSV file with a header row
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())
            .with_context(|| format!("Failed to open brand table: {:?}", path.as_ref()))?;

        let mut entries = Vec::new();
        for (line, row) in reader.deserialize().enumerate() {
            let entry: BrandEntry = row
                .with_context(|| format!("Failed to parse brand table row {}", line + 2))?;
            entries.push(entry);
        }

        Ok(BrandTable::from_entries(entries))
    }

    /// Exact or whole-word substring match; longest keyword wins
    pub fn lookup(&self, text: &str) -> Option<&BrandEntry> {
        let normalized = normalize_key(text);
        if normalized.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .find(|entry| contains_word(&normalized, &entry.keyword))
    }

    /// True if any keyword appears in the text
    pub fn mentions_keyword(&self, text: &str) -> bool {
        self.lookup(text).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BrandTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// KEYWORD PATTERN TABLE
// ============================================================================

/// Serialized form of a keyword pattern (JSON file or built-in defaults)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    /// Rule ID, reported back on matches
    pub id: String,

    /// Regular expression, matched case-insensitively
    pub pattern: String,

    pub ticker: String,
    pub company_name: String,
    pub category: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// Priority (higher = evaluated first)
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone)]
pub struct KeywordPattern {
    pub rule: PatternRule,
    regex: Regex,
}

impl KeywordPattern {
    pub fn compile(rule: PatternRule) -> Result<Self> {
        let regex = RegexBuilder::new(&rule.pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid keyword pattern '{}': {}", rule.id, rule.pattern))?;
        Ok(KeywordPattern { rule, regex })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Ordered regex table. Evaluation is first-match in priority order, so a
/// specific pattern ("hp envy") must carry a higher priority than the bare
/// one ("hp").
#[derive(Debug, Clone)]
pub struct PatternTable {
    patterns: Vec<KeywordPattern>,
}

impl PatternTable {
    pub fn from_rules(rules: Vec<PatternRule>) -> Result<Self> {
        let mut patterns = rules
            .into_iter()
            .map(KeywordPattern::compile)
            .collect::<Result<Vec<_>>>()?;

        // Stable sort: equal priorities keep file order
        patterns.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Ok(PatternTable { patterns })
    }

    /// Load rules from a JSON array file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read pattern file: {:?}", path.as_ref()))?;

        let rules: Vec<PatternRule> =
            serde_json::from_str(&content).context("Failed to parse pattern JSON")?;

        PatternTable::from_rules(rules)
    }

    pub fn with_defaults() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|(id, pattern, ticker, company, category, confidence, priority)| {
                let rule = PatternRule {
                    id: id.to_string(),
                    pattern: pattern.to_string(),
                    ticker: ticker.to_string(),
                    company_name: company.to_string(),
                    category: category.to_string(),
                    confidence: *confidence,
                    priority: *priority,
                };
                match KeywordPattern::compile(rule) {
                    Ok(compiled) => Some(compiled),
                    Err(e) => {
                        warn!(
                            id = *id,
                            error = %e,
                            "Built-in keyword pattern failed to compile, skipping"
                        );
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        let mut table = PatternTable { patterns };
        table
            .patterns
            .sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        table
    }

    /// First pattern (in priority order) matching the text
    pub fn find(&self, text: &str) -> Option<&PatternRule> {
        self.patterns
            .iter()
            .find(|pattern| pattern.matches(text))
            .map(|pattern| &pattern.rule)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// STATIC TABLES (loaded once, injected read-only)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StaticTables {
    pub brands: BrandTable,
    pub patterns: PatternTable,
}

impl StaticTables {
    pub fn new(brands: BrandTable, patterns: PatternTable) -> Self {
        StaticTables { brands, patterns }
    }

    /// Load the tables named in the config, falling back to built-in defaults
    pub fn load(config: &Config) -> Result<Self> {
        let brands = match &config.brand_table_path {
            Some(path) => BrandTable::from_csv(path)?,
            None => BrandTable::with_defaults(),
        };

        let patterns = match &config.pattern_table_path {
            Some(path) => PatternTable::from_file(path)?,
            None => PatternTable::with_defaults(),
        };

        info!(
            brands = brands.len(),
            patterns = patterns.len(),
            "Static brand tables loaded"
        );

        Ok(StaticTables { brands, patterns })
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Normalize a merchant/brand string into a lookup key
///
/// - Lowercase
/// - Remove location codes (*123, #456) but keep words like *TRIP
/// - Strip punctuation hugging a word ("NIKE," → "nike")
/// - Remove common suffixes (Inc, Corp, LLC, .com)
/// - Collapse whitespace
pub fn normalize_key(s: &str) -> String {
    let mut normalized = s
        .to_lowercase()
        .split_whitespace()
        .filter_map(|word| {
            if let Some(rest) = word.strip_prefix(['*', '#']) {
                if rest.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                return Some(rest.to_string());
            }
            Some(word.to_string())
        })
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric() && c != '&' && c != '\'')
                .to_string()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let suffixes = [
        " inc", " corp", " llc", " ltd", " corporation", " company", ".com", ".net",
    ];
    for suffix in &suffixes {
        if normalized.ends_with(suffix) {
            normalized.truncate(normalized.len() - suffix.len());
        }
    }

    normalized.trim().to_string()
}

/// Whole-word containment: "hp" is in "hp ink" but not in "chips"
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

// ============================================================================
// DEFAULT DATA
// ============================================================================

const R: EntryKind = EntryKind::Retailer;
const B: EntryKind = EntryKind::Brand;

#[rustfmt::skip]
const DEFAULT_BRANDS: &[(&str, &str, &str, &str, EntryKind, f64)] = &[
    // Retailers
    ("walmart", "WMT", "Walmart", "Retail", R, 0.95),
    ("target", "TGT", "Target", "Retail", R, 0.95),
    ("costco", "COST", "Costco", "Wholesale", R, 0.95),
    ("costco wholesale", "COST", "Costco", "Wholesale", R, 0.95),
    ("amazon", "AMZN", "Amazon", "E-commerce", R, 0.95),
    ("whole foods", "AMZN", "Amazon", "Grocery", R, 0.95),
    ("home depot", "HD", "The Home Depot", "Home Improvement", R, 0.95),
    ("lowe's", "LOW", "Lowe's", "Home Improvement", R, 0.95),
    ("lowes", "LOW", "Lowe's", "Home Improvement", R, 0.95),
    ("kroger", "KR", "Kroger", "Grocery", R, 0.95),
    ("cvs", "CVS", "CVS Health", "Pharmacy", R, 0.95),
    ("walgreens", "WBA", "Walgreens", "Pharmacy", R, 0.95),
    ("best buy", "BBY", "Best Buy", "Electronics", R, 0.95),
    ("starbucks", "SBUX", "Starbucks", "Restaurants", R, 0.95),
    ("mcdonald's", "MCD", "McDonald's", "Restaurants", R, 0.95),
    ("mcdonalds", "MCD", "McDonald's", "Restaurants", R, 0.95),
    ("chipotle", "CMG", "Chipotle", "Restaurants", R, 0.95),
    ("dollar general", "DG", "Dollar General", "Retail", R, 0.95),
    ("dollar tree", "DLTR", "Dollar Tree", "Retail", R, 0.95),
    ("tj maxx", "TJX", "TJX Companies", "Apparel", R, 0.95),
    ("marshalls", "TJX", "TJX Companies", "Apparel", R, 0.95),
    ("nike store", "NKE", "Nike", "Apparel", R, 0.95),
    ("apple store", "AAPL", "Apple", "Electronics", R, 0.95),
    ("foot locker", "FL", "Foot Locker", "Apparel", R, 0.95),
    ("ulta", "ULTA", "Ulta Beauty", "Beauty", R, 0.95),
    ("old navy", "GAP", "Gap", "Apparel", R, 0.95),
    ("lululemon", "LULU", "Lululemon", "Apparel", R, 0.95),
    ("dick's sporting goods", "DKS", "Dick's Sporting Goods", "Retail", R, 0.95),
    ("macy's", "M", "Macy's", "Retail", R, 0.95),
    ("kohl's", "KSS", "Kohl's", "Retail", R, 0.95),
    ("autozone", "AZO", "AutoZone", "Automotive", R, 0.95),
    ("exxon", "XOM", "Exxon Mobil", "Fuel", R, 0.90),
    ("chevron", "CVX", "Chevron", "Fuel", R, 0.90),
    // Brands
    ("nike", "NKE", "Nike", "Apparel", B, 0.90),
    ("air max", "NKE", "Nike", "Apparel", B, 0.90),
    ("jordan", "NKE", "Nike", "Apparel", B, 0.90),
    ("adidas", "ADDYY", "Adidas", "Apparel", B, 0.90),
    ("under armour", "UAA", "Under Armour", "Apparel", B, 0.90),
    ("apple", "AAPL", "Apple", "Electronics", B, 0.90),
    ("iphone", "AAPL", "Apple", "Electronics", B, 0.92),
    ("coca-cola", "KO", "Coca-Cola", "Beverages", B, 0.92),
    ("coca cola", "KO", "Coca-Cola", "Beverages", B, 0.92),
    ("coke", "KO", "Coca-Cola", "Beverages", B, 0.90),
    ("pepsi", "PEP", "PepsiCo", "Beverages", B, 0.92),
    ("doritos", "PEP", "PepsiCo", "Snacks", B, 0.90),
    ("lays", "PEP", "PepsiCo", "Snacks", B, 0.90),
    ("gatorade", "PEP", "PepsiCo", "Beverages", B, 0.90),
    ("tide", "PG", "Procter & Gamble", "Household", B, 0.90),
    ("pampers", "PG", "Procter & Gamble", "Household", B, 0.90),
    ("gillette", "PG", "Procter & Gamble", "Personal Care", B, 0.90),
    ("charmin", "PG", "Procter & Gamble", "Household", B, 0.90),
    ("crest", "PG", "Procter & Gamble", "Personal Care", B, 0.90),
    ("colgate", "CL", "Colgate-Palmolive", "Personal Care", B, 0.90),
    ("kraft", "KHC", "Kraft Heinz", "Grocery", B, 0.90),
    ("heinz", "KHC", "Kraft Heinz", "Grocery", B, 0.90),
    ("oreo", "MDLZ", "Mondelez", "Snacks", B, 0.90),
    ("cheerios", "GIS", "General Mills", "Grocery", B, 0.90),
    ("hershey", "HSY", "Hershey", "Snacks", B, 0.90),
    ("huggies", "KMB", "Kimberly-Clark", "Household", B, 0.90),
    ("kleenex", "KMB", "Kimberly-Clark", "Household", B, 0.90),
    ("clorox", "CLX", "Clorox", "Household", B, 0.90),
    ("monster energy", "MNST", "Monster Beverage", "Beverages", B, 0.90),
    ("samsung", "SSNLF", "Samsung", "Electronics", B, 0.90),
    ("sony", "SONY", "Sony", "Electronics", B, 0.90),
    ("microsoft", "MSFT", "Microsoft", "Electronics", B, 0.90),
    ("nintendo", "NTDOY", "Nintendo", "Electronics", B, 0.90),
    ("dell", "DELL", "Dell", "Electronics", B, 0.90),
];

#[rustfmt::skip]
const DEFAULT_PATTERNS: &[(&str, &str, &str, &str, &str, f64, i32)] = &[
    ("hp-envy", r"\bhp\s+envy\b", "HPQ", "HP Inc", "Electronics", 0.98, 100),
    ("hp-spectre", r"\bhp\s+spectre\b", "HPQ", "HP Inc", "Electronics", 0.97, 100),
    ("hp-ink", r"\bhp\s*\d{2,3}\s*(?:xl\s*)?ink\b", "HPQ", "HP Inc", "Electronics", 0.95, 90),
    ("apple-devices", r"\b(?:macbook|ipad|airpods|apple\s*watch)\b", "AAPL", "Apple", "Electronics", 0.95, 80),
    ("playstation", r"\b(?:playstation|ps[45])\b", "SONY", "Sony", "Electronics", 0.95, 80),
    ("xbox", r"\bxbox\b", "MSFT", "Microsoft", "Electronics", 0.95, 80),
    ("galaxy", r"\bgalaxy\s+(?:s|a|z|tab|buds)\s*\d*\b", "SSNLF", "Samsung", "Electronics", 0.90, 70),
    ("mcd-menu", r"\b(?:big\s*mac|mcflurry|mcnuggets?|mcchicken)\b", "MCD", "McDonald's", "Restaurants", 0.95, 70),
    ("kirkland", r"\bkirkland\b", "COST", "Costco", "Wholesale", 0.90, 60),
    ("great-value", r"\bgreat\s+value\b", "WMT", "Walmart", "Grocery", 0.90, 60),
    ("equate", r"\bequate\b", "WMT", "Walmart", "Personal Care", 0.85, 60),
    ("up-and-up", r"\bup\s*&\s*up\b", "TGT", "Target", "Household", 0.85, 60),
    ("good-and-gather", r"\bgood\s*&\s*gather\b", "TGT", "Target", "Grocery", 0.85, 60),
    ("amazon-basics", r"\bamazon\s*basics\b", "AMZN", "Amazon", "Household", 0.90, 60),
    ("sbux-menu", r"\b(?:frappuccino|pike\s+place)\b", "SBUX", "Starbucks", "Restaurants", 0.85, 50),
    ("ko-family", r"\b(?:sprite|fanta|dasani|minute\s+maid)\b", "KO", "Coca-Cola", "Beverages", 0.85, 40),
    ("pep-family", r"\b(?:cheetos|tostitos|fritos|quaker)\b", "PEP", "PepsiCo", "Snacks", 0.85, 40),
    ("ocr-walmart", r"\bwal[\s\-*]?m[a4]rt\b", "WMT", "Walmart", "Retail", 0.85, 20),
    ("ocr-nike", r"\bn[i1l!]ke\b", "NKE", "Nike", "Apparel", 0.80, 20),
    ("ocr-starbucks", r"\bst[a4]rb[uv]cks?\b", "SBUX", "Starbucks", "Restaurants", 0.80, 20),
    ("ocr-target", r"\bt[a4]rg[e3]t\b", "TGT", "Target", "Retail", 0.80, 20),
    ("ocr-costco", r"\bc[o0]stc[o0]\b", "COST", "Costco", "Wholesale", 0.80, 20),
    ("hp-bare", r"\bhp\b", "HPQ", "HP Inc", "Electronics", 0.75, 10),
];

// ============================================================================
// TESTS
// ============================================================================
