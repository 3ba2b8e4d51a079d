// 🔎 Merchant/Brand Resolver - Tiered matching cascade
//
// learned mappings → static table → keyword patterns → no match
//
// Each tier is a Matcher; the Resolver walks them in order and the first hit
// wins. A miss is not an error: it comes back as BrandMatch::none().

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::amount::{is_date_or_time_line, letter_count};
use crate::brands::StaticTables;
use crate::mapping_store::MappingStore;
use crate::parser::{is_skip_line, LineItem};
use crate::receipt::Retailer;

/// Lines at the top of a receipt considered as the store name
pub const RETAILER_HEADER_LINES: usize = 6;

/// Payment-method lines never resolve to a ticker
static PAYMENT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:debit\s+tend|credit\s+tend|cash\s+tend|pay\s+from|visa|master\s?card|amex|american\s+express|discover|debit|credit\s+card|ebt|apple\s+pay|google\s+pay|gift\s+card)\b|(?:\*{3,}|x{4,})\s*\d{4}",
    )
    .unwrap()
});

// ============================================================================
// BRAND MATCH
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchSource {
    LearnedMapping,
    StaticTable,
    KeywordPattern,
    None,
}

impl MatchSource {
    pub fn name(&self) -> &'static str {
        match self {
            MatchSource::LearnedMapping => "learned_mapping",
            MatchSource::StaticTable => "static_table",
            MatchSource::KeywordPattern => "keyword_pattern",
            MatchSource::None => "none",
        }
    }
}

/// Result of resolving one name.
///
/// Invariant: `confidence == 0.0` exactly when `source == MatchSource::None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandMatch {
    pub ticker: Option<String>,
    pub company_name: Option<String>,
    pub category: Option<String>,
    pub confidence: f64,
    pub source: MatchSource,

    /// Mapping key, table keyword or pattern id that produced the match
    pub matched_on: Option<String>,
}

/// Floor for a real match, keeps the zero-confidence invariant intact
const MIN_MATCH_CONFIDENCE: f64 = 0.01;

impl BrandMatch {
    pub fn new(
        ticker: &str,
        company_name: &str,
        category: &str,
        confidence: f64,
        source: MatchSource,
        matched_on: &str,
    ) -> Self {
        if source == MatchSource::None {
            return BrandMatch::none();
        }

        BrandMatch {
            ticker: Some(ticker.to_string()),
            company_name: Some(company_name.to_string()),
            category: Some(category.to_string()),
            confidence: if confidence.is_finite() {
                confidence.clamp(MIN_MATCH_CONFIDENCE, 1.0)
            } else {
                MIN_MATCH_CONFIDENCE
            },
            source,
            matched_on: Some(matched_on.to_string()),
        }
    }

    pub fn none() -> Self {
        BrandMatch {
            ticker: None,
            company_name: None,
            category: None,
            confidence: 0.0,
            source: MatchSource::None,
            matched_on: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.source != MatchSource::None
    }
}

// ============================================================================
// MATCHER STRATEGIES
// ============================================================================

/// One tier of the cascade
pub trait Matcher: Send + Sync {
    fn source(&self) -> MatchSource;

    /// `None` means "no opinion, try the next tier"
    fn find_match(&self, text: &str) -> Option<BrandMatch>;
}

/// Tier 1: approved records from the mapping store
pub struct LearnedMappingMatcher {
    store: Arc<dyn MappingStore>,
}

impl LearnedMappingMatcher {
    pub fn new(store: Arc<dyn MappingStore>) -> Self {
        LearnedMappingMatcher { store }
    }
}

impl Matcher for LearnedMappingMatcher {
    fn source(&self) -> MatchSource {
        MatchSource::LearnedMapping
    }

    fn find_match(&self, text: &str) -> Option<BrandMatch> {
        // exact key first, then whole-word containment
        let found = self
            .store
            .lookup(text)
            .and_then(|exact| match exact {
                Some(record) => Ok(Some(record)),
                None => self.store.find_in_text(text),
            });

        match found {
            Ok(record) => record.map(|r| {
                BrandMatch::new(
                    &r.ticker,
                    &r.company_name,
                    &r.category,
                    r.confidence,
                    self.source(),
                    &r.key,
                )
            }),
            Err(e) => {
                warn!(error = %e, text, "Mapping store lookup failed, skipping tier");
                None
            }
        }
    }
}

/// Tier 2: static brand/retailer table
pub struct StaticTableMatcher {
    tables: Arc<StaticTables>,
}

impl StaticTableMatcher {
    pub fn new(tables: Arc<StaticTables>) -> Self {
        StaticTableMatcher { tables }
    }
}

impl Matcher for StaticTableMatcher {
    fn source(&self) -> MatchSource {
        MatchSource::StaticTable
    }

    fn find_match(&self, text: &str) -> Option<BrandMatch> {
        self.tables.brands.lookup(text).map(|entry| {
            BrandMatch::new(
                &entry.ticker,
                &entry.company_name,
                &entry.category,
                entry.confidence,
                self.source(),
                &entry.keyword,
            )
        })
    }
}

/// Tier 3: ordered regex keyword patterns
pub struct KeywordPatternMatcher {
    tables: Arc<StaticTables>,
}

impl KeywordPatternMatcher {
    pub fn new(tables: Arc<StaticTables>) -> Self {
        KeywordPatternMatcher { tables }
    }
}

impl Matcher for KeywordPatternMatcher {
    fn source(&self) -> MatchSource {
        MatchSource::KeywordPattern
    }

    fn find_match(&self, text: &str) -> Option<BrandMatch> {
        self.tables.patterns.find(text).map(|rule| {
            BrandMatch::new(
                &rule.ticker,
                &rule.company_name,
                &rule.category,
                rule.confidence,
                self.source(),
                &rule.id,
            )
        })
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct Resolver {
    matchers: Vec<Box<dyn Matcher>>,
}

impl Resolver {
    /// Standard three-tier cascade
    pub fn new(store: Arc<dyn MappingStore>, tables: Arc<StaticTables>) -> Self {
        Resolver::from_matchers(vec![
            Box::new(LearnedMappingMatcher::new(store)),
            Box::new(StaticTableMatcher::new(Arc::clone(&tables))),
            Box::new(KeywordPatternMatcher::new(tables)),
        ])
    }

    pub fn from_matchers(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Resolver { matchers }
    }

    /// Resolve one name; payment tokens and misses come back unresolved
    pub fn resolve(&self, text: &str) -> BrandMatch {
        let text = text.trim();
        if text.is_empty() || is_payment_token(text) {
            return BrandMatch::none();
        }

        for matcher in &self.matchers {
            if let Some(found) = matcher.find_match(text) {
                debug!(
                    text,
                    source = found.source.name(),
                    ticker = found.ticker.as_deref().unwrap_or(""),
                    confidence = found.confidence,
                    "Resolved"
                );
                return found;
            }
        }

        debug!(text, "No ticker match");
        BrandMatch::none()
    }

    /// Attach a BrandMatch to every item; payment-method lines are left
    /// without one so they never reach allocation
    pub fn resolve_items(&self, items: &mut [LineItem]) {
        for item in items.iter_mut() {
            if is_payment_token(&item.name) {
                item.resolved_brand = None;
                continue;
            }
            item.resolved_brand = Some(self.resolve(&item.name));
        }
    }

    /// Resolve the store from the receipt header.
    ///
    /// Falls back to the first non-numeric, non-date line as a provisional
    /// name with no ticker.
    pub fn resolve_retailer(&self, lines: &[String]) -> Retailer {
        for candidate in retailer_candidates(lines) {
            let found = self.resolve(candidate);
            if found.is_resolved() {
                return Retailer::resolved(candidate, found);
            }
        }

        lines
            .iter()
            .map(|line| line.trim())
            .find(|line| letter_count(line) > 0 && !is_date_or_time_line(line))
            .map(Retailer::provisional)
            .unwrap_or_else(Retailer::unknown)
    }
}

/// Header lines worth running through the cascade as a store name
fn retailer_candidates(lines: &[String]) -> impl Iterator<Item = &str> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .take(RETAILER_HEADER_LINES)
        .filter(|line| {
            letter_count(line) > 0
                && !is_date_or_time_line(line)
                && !is_skip_line(line)
                && !is_payment_token(line)
        })
}

/// Card labels, tender lines and masked card numbers
pub fn is_payment_token(text: &str) -> bool {
    PAYMENT_TOKEN_RE.is_match(text)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping_store::{InMemoryMappingStore, MappingRecord};

    fn resolver_with_store() -> (Resolver, Arc<InMemoryMappingStore>) {
        let store = Arc::new(InMemoryMappingStore::new());
        let tables = Arc::new(StaticTables::default());
        (Resolver::new(store.clone(), tables), store)
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_brand_match_invariant() {
        let none = BrandMatch::none();
        assert_eq!(none.confidence, 0.0);
        assert!(!none.is_resolved());

        let zero = BrandMatch::new("NKE", "Nike", "Apparel", 0.0, MatchSource::StaticTable, "nike");
        assert!(zero.confidence > 0.0);

        let coerced = BrandMatch::new("NKE", "Nike", "Apparel", 0.9, MatchSource::None, "nike");
        assert_eq!(coerced, BrandMatch::none());
    }

    #[test]
    fn test_static_table_tier() {
        let (resolver, _) = resolver_with_store();
        let found = resolver.resolve("AIR MAX");

        assert_eq!(found.ticker.as_deref(), Some("NKE"));
        assert_eq!(found.source, MatchSource::StaticTable);
        assert_eq!(found.matched_on.as_deref(), Some("air max"));
    }

    #[test]
    fn test_pattern_tier_most_specific_first() {
        let (resolver, _) = resolver_with_store();

        let envy = resolver.resolve("HP ENVY X360");
        assert_eq!(envy.source, MatchSource::KeywordPattern);
        assert_eq!(envy.matched_on.as_deref(), Some("hp-envy"));
        assert_eq!(envy.confidence, 0.98);

        let bare = resolver.resolve("HP MOUSE");
        assert_eq!(bare.matched_on.as_deref(), Some("hp-bare"));
    }

    #[test]
    fn test_ocr_misspelling_reaches_pattern_tier() {
        let (resolver, _) = resolver_with_store();
        let found = resolver.resolve("STARBVCKS COFFEE");
        assert_eq!(found.ticker.as_deref(), Some("SBUX"));
        assert_eq!(found.source, MatchSource::KeywordPattern);
    }

    #[test]
    fn test_learned_mapping_beats_static_table() {
        let (resolver, store) = resolver_with_store();
        store
            .approve(MappingRecord::new("air max", "FL", "Foot Locker", "Apparel", 0.87), "t")
            .unwrap();

        let found = resolver.resolve("AIR MAX");
        assert_eq!(found.source, MatchSource::LearnedMapping);
        assert_eq!(found.ticker.as_deref(), Some("FL"));
        assert_eq!(found.confidence, 0.87);
    }

    #[test]
    fn test_pending_mapping_is_ignored() {
        let (resolver, store) = resolver_with_store();
        store
            .upsert(&MappingRecord::new("air max", "FL", "Foot Locker", "Apparel", 0.87), "t")
            .unwrap();

        assert_eq!(resolver.resolve("AIR MAX").source, MatchSource::StaticTable);
    }

    #[test]
    fn test_miss_is_zero_confidence() {
        let (resolver, _) = resolver_with_store();
        let found = resolver.resolve("ORGANIC KALE");
        assert_eq!(found, BrandMatch::none());
    }

    #[test]
    fn test_payment_tokens_excluded() {
        let (resolver, _) = resolver_with_store();
        assert!(is_payment_token("US DEBIT TEND"));
        assert!(is_payment_token("PAY FROM PRIMARY"));
        assert!(is_payment_token("VISA ************1234"));
        assert!(!is_payment_token("AIR MAX"));

        // "apple pay" would otherwise hit the Apple brand
        assert!(!resolver.resolve("APPLE PAY").is_resolved());

        let mut items = vec![
            LineItem::new("AIR MAX", 1, 8999),
            LineItem::new("DEBIT TEND", 1, 8999),
        ];
        resolver.resolve_items(&mut items);
        assert!(items[0].resolved_brand.as_ref().unwrap().is_resolved());
        assert!(items[1].resolved_brand.is_none());
    }

    #[test]
    fn test_retailer_from_header() {
        let (resolver, _) = resolver_with_store();
        let retailer = resolver.resolve_retailer(&lines("03/14/2024\nNIKE STORE #211\n2\nAIR MAX\n89.99"));

        assert_eq!(retailer.name, "Nike");
        assert_eq!(retailer.raw_name, "NIKE STORE #211");
        assert_eq!(retailer.ticker.as_deref(), Some("NKE"));
        assert_eq!(retailer.confidence, 0.95);
    }

    #[test]
    fn test_retailer_provisional_fallback() {
        let (resolver, _) = resolver_with_store();
        let retailer = resolver.resolve_retailer(&lines("12/01/2023\n555-1234\nCORNER BODEGA\nSODA 1.50"));

        assert_eq!(retailer.name, "CORNER BODEGA");
        assert!(retailer.ticker.is_none());
        assert_eq!(retailer.confidence, 0.0);
    }

    #[test]
    fn test_retailer_unknown_on_empty() {
        let (resolver, _) = resolver_with_store();
        let retailer = resolver.resolve_retailer(&[]);
        assert!(retailer.ticker.is_none());
        assert!(retailer.name.is_empty());
    }
}
