// 🧮 Receipt Assembler - Retailer + items + total → one Receipt
//
// Data-quality problems never fail assembly. They are recorded as
// ReviewIssues, and a receipt with nothing usable at all is flagged for
// manual review instead of being dropped.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use tracing::info;

use crate::allocation::TickerWeight;
use crate::amount::{parse_cents, parse_date, price_on_line, AMOUNT_RE, MAX_TOTAL_CENTS, MIN_PRICE_CENTS};
use crate::feedback::{Correction, CorrectionTarget};
use crate::parser::{normalized_lines, LineItem, LineKind, LineParser};
use crate::resolver::{BrandMatch, MatchSource, Resolver};

static TOTAL_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sub\s*-?\s*total|total|amount(?:\s+due)?|balance(?:\s+due)?|paid)\b")
        .unwrap()
});

// ============================================================================
// RETAILER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retailer {
    /// Company name when resolved, otherwise the raw header line
    pub name: String,

    /// Header line the name came from (learning key)
    pub raw_name: String,
    pub ticker: Option<String>,
    pub category: Option<String>,
    pub confidence: f64,
    pub source: MatchSource,
}

impl Retailer {
    pub fn resolved(raw_name: &str, found: BrandMatch) -> Self {
        Retailer {
            name: found
                .company_name
                .clone()
                .unwrap_or_else(|| raw_name.to_string()),
            raw_name: raw_name.to_string(),
            ticker: found.ticker,
            category: found.category,
            confidence: found.confidence,
            source: found.source,
        }
    }

    /// Name taken from the text, no ticker
    pub fn provisional(raw_name: &str) -> Self {
        Retailer {
            name: raw_name.to_string(),
            raw_name: raw_name.to_string(),
            ticker: None,
            category: None,
            confidence: 0.0,
            source: MatchSource::None,
        }
    }

    pub fn unknown() -> Self {
        Retailer::provisional("")
    }

    pub fn is_resolved(&self) -> bool {
        self.ticker.is_some()
    }
}

// ============================================================================
// RECEIPT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewIssue {
    /// No line items could be read
    ParseFailure,
    RetailerUnresolved,
    ResolutionMiss { item_index: usize, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,

    /// SHA-256 of the normalized text; identical OCR output → same value
    pub fingerprint: String,
    pub retailer: Retailer,
    pub items: Vec<LineItem>,
    pub total_cents: i64,
    pub purchase_date: Option<NaiveDate>,
    pub needs_manual_review: bool,
    pub issues: Vec<ReviewIssue>,
    pub created_at: DateTime<Utc>,

    /// Set on a receipt produced by corrections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_receipt_id: Option<String>,
}

impl Receipt {
    pub fn new(
        fingerprint: String,
        retailer: Retailer,
        items: Vec<LineItem>,
        total_cents: i64,
        purchase_date: Option<NaiveDate>,
    ) -> Self {
        let mut receipt = Receipt {
            id: uuid::Uuid::new_v4().to_string(),
            fingerprint,
            retailer,
            items,
            total_cents,
            purchase_date,
            needs_manual_review: false,
            issues: Vec::new(),
            created_at: Utc::now(),
            previous_receipt_id: None,
        };
        receipt.refresh_review_state();
        receipt
    }

    pub fn total(&self) -> f64 {
        crate::amount::cents_to_dollars(self.total_cents)
    }

    /// Items that went through the cascade without a match
    pub fn unmapped_items(&self) -> Vec<&LineItem> {
        self.items
            .iter()
            .filter(|item| {
                item.resolved_brand
                    .as_ref()
                    .map_or(false, |found| !found.is_resolved())
            })
            .collect()
    }

    /// Allocation weights for this receipt.
    ///
    /// Resolved items weigh `confidence × line total`. With no resolved item,
    /// a resolved retailer takes everything (weight 1).
    pub fn ticker_weights(&self) -> Vec<TickerWeight> {
        let weights: Vec<TickerWeight> = self
            .items
            .iter()
            .filter_map(|item| {
                let found = item.resolved_brand.as_ref()?;
                let ticker = found.ticker.as_ref()?;
                Some(TickerWeight::new(ticker, found.confidence * item.line_total()))
            })
            .collect();

        if !weights.is_empty() {
            return weights;
        }

        match &self.retailer.ticker {
            Some(ticker) => vec![TickerWeight::new(ticker, 1.0)],
            // allocator falls back to the default ticker
            None => Vec::new(),
        }
    }

    /// New receipt with manual corrections applied; `self` is left untouched
    pub fn with_corrections(&self, corrections: &[Correction]) -> Receipt {
        let mut corrected = self.clone();
        corrected.id = uuid::Uuid::new_v4().to_string();
        corrected.created_at = Utc::now();
        corrected.previous_receipt_id = Some(self.id.clone());

        for correction in corrections {
            let found = correction.to_brand_match();
            match correction.target {
                CorrectionTarget::Retailer => {
                    corrected.retailer = Retailer::resolved(&self.retailer.raw_name, found);
                }
                CorrectionTarget::Item(index) => {
                    if let Some(item) = corrected.items.get_mut(index) {
                        item.resolved_brand = Some(found);
                    }
                }
            }
        }

        corrected.refresh_review_state();
        corrected
    }

    fn refresh_review_state(&mut self) {
        let mut issues = Vec::new();

        if self.items.is_empty() {
            issues.push(ReviewIssue::ParseFailure);
        }
        if !self.retailer.is_resolved() {
            issues.push(ReviewIssue::RetailerUnresolved);
        }
        for (index, item) in self.items.iter().enumerate() {
            if matches!(&item.resolved_brand, Some(found) if !found.is_resolved()) {
                issues.push(ReviewIssue::ResolutionMiss {
                    item_index: index,
                    name: item.name.clone(),
                });
            }
        }

        self.needs_manual_review =
            !self.retailer.is_resolved() && self.items.is_empty() && self.total_cents == 0;
        self.issues = issues;
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

pub struct ReceiptAssembler {
    parser: LineParser,
    resolver: Resolver,
}

impl ReceiptAssembler {
    pub fn new(parser: LineParser, resolver: Resolver) -> Self {
        ReceiptAssembler { parser, resolver }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Build a Receipt from raw OCR text; never fails
    pub fn assemble(&self, text: &str) -> Receipt {
        let lines = normalized_lines(text);

        let retailer = self.resolver.resolve_retailer(&lines);
        let header = self.header_line(&lines, &retailer);

        let mut items = self.parser.parse_lines_with_header(&lines, header);
        self.resolver.resolve_items(&mut items);

        let total_cents = extract_total(text);
        let purchase_date = lines.iter().find_map(|line| parse_date(line));

        let receipt = Receipt::new(fingerprint(&lines), retailer, items, total_cents, purchase_date);

        info!(
            receipt_id = %receipt.id,
            retailer = %receipt.retailer.name,
            ticker = receipt.retailer.ticker.as_deref().unwrap_or("-"),
            items = receipt.items.len(),
            unmapped = receipt.unmapped_items().len(),
            total_cents = receipt.total_cents,
            needs_manual_review = receipt.needs_manual_review,
            "Receipt assembled"
        );

        receipt
    }

    /// Index of the resolved store-name line, when no name line comes before it
    fn header_line(&self, lines: &[String], retailer: &Retailer) -> Option<usize> {
        retailer.ticker.as_ref()?;
        let index = lines.iter().position(|line| line.trim() == retailer.raw_name)?;

        lines[..index]
            .iter()
            .all(|line| self.parser.classify_line(line) != LineKind::Name)
            .then_some(index)
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Largest currency figure that follows a total/subtotal/amount/balance/paid
/// keyword, on the same line or alone on the next one. 0 when none is found.
pub fn extract_total(text: &str) -> i64 {
    let lines = normalized_lines(text);
    let mut candidates = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(keyword) = TOTAL_KEYWORD_RE.find(line) else {
            continue;
        };

        let same_line: Vec<i64> = AMOUNT_RE
            .find_iter(&line[keyword.end()..])
            .filter_map(|m| parse_cents(m.as_str()))
            .collect();

        if same_line.is_empty() {
            if let Some(cents) = lines.get(i + 1).and_then(|next| price_on_line(next)) {
                candidates.push(cents);
            }
        } else {
            candidates.extend(same_line);
        }
    }

    candidates
        .into_iter()
        .filter(|cents| (MIN_PRICE_CENTS..=MAX_TOTAL_CENTS).contains(cents))
        .max()
        .unwrap_or(0)
}

/// SHA-256 hex digest of normalized receipt lines
pub fn fingerprint<S: AsRef<str>>(lines: &[S]) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brands::StaticTables;
    use crate::mapping_store::InMemoryMappingStore;
    use std::sync::Arc;

    fn assembler() -> ReceiptAssembler {
        let tables = Arc::new(StaticTables::default());
        let resolver = Resolver::new(Arc::new(InMemoryMappingStore::new()), tables.clone());
        ReceiptAssembler::new(LineParser::new(tables.brands.clone()), resolver)
    }

    #[test]
    fn test_nike_example() {
        let receipt = assembler().assemble("NIKE STORE\n2\nAIR MAX\n89.99\nTOTAL 89.99");

        assert_eq!(receipt.retailer.name, "Nike");
        assert_eq!(receipt.retailer.ticker.as_deref(), Some("NKE"));
        assert_eq!(receipt.items.len(), 1);
        assert_eq!(receipt.items[0].name, "AIR MAX");
        assert_eq!(receipt.items[0].quantity, 2);
        assert_eq!(receipt.items[0].line_total_cents, 8999);
        assert_eq!(receipt.items[0].ticker(), Some("NKE"));
        assert_eq!(receipt.total_cents, 8999);
        assert_eq!(receipt.total(), 89.99);
        assert!(!receipt.needs_manual_review);
        assert!(receipt.issues.is_empty());
    }

    #[test]
    fn test_store_header_is_not_an_item() {
        let receipt = assembler().assemble("TARGET\n03/14/2024\n12.99\nTOTAL 12.99");

        assert_eq!(receipt.retailer.ticker.as_deref(), Some("TGT"));
        assert!(receipt.items.is_empty());
        assert_eq!(receipt.total_cents, 1299);
        assert!(receipt.issues.contains(&ReviewIssue::ParseFailure));
    }

    #[test]
    fn test_empty_text_needs_review() {
        let receipt = assembler().assemble("");

        assert!(receipt.needs_manual_review);
        assert!(receipt.items.is_empty());
        assert_eq!(receipt.total_cents, 0);
        assert!(receipt.issues.contains(&ReviewIssue::ParseFailure));
        assert!(receipt.issues.contains(&ReviewIssue::RetailerUnresolved));
    }

    #[test]
    fn test_review_flag_needs_all_three_conditions() {
        // unknown store, no items, but a readable total
        let receipt = assembler().assemble("CORNER BODEGA\nTOTAL 12.00");
        assert!(!receipt.needs_manual_review);
        assert_eq!(receipt.retailer.name, "CORNER BODEGA");
        assert!(receipt.issues.contains(&ReviewIssue::ParseFailure));
    }

    #[test]
    fn test_unmapped_item_is_kept() {
        let receipt = assembler().assemble("TARGET\nORGANIC KALE\n3.99\nTIDE PODS 12.99\nTOTAL 16.98");

        assert_eq!(receipt.items.len(), 2);
        let unmapped = receipt.unmapped_items();
        assert_eq!(unmapped.len(), 1);
        assert_eq!(unmapped[0].name, "ORGANIC KALE");
        assert_eq!(
            unmapped[0].resolved_brand.as_ref().map(|m| m.confidence),
            Some(0.0)
        );
        assert!(receipt.issues.contains(&ReviewIssue::ResolutionMiss {
            item_index: 0,
            name: "ORGANIC KALE".to_string()
        }));
    }

    #[test]
    fn test_extract_total_takes_maximum() {
        let text = "SUBTOTAL 18.50\nTAX 1.48\nTOTAL 19.98\nAMOUNT PAID $19.98";
        assert_eq!(extract_total(text), 1998);
    }

    #[test]
    fn test_extract_total_next_line() {
        assert_eq!(extract_total("BALANCE DUE\n42.10\nTHANK YOU"), 4210);
    }

    #[test]
    fn test_extract_total_bounds() {
        assert_eq!(extract_total("TOTAL 0.00"), 0);
        assert_eq!(extract_total("TOTAL 250,000.00\nSUBTOTAL 12.00"), 1200);
        assert_eq!(extract_total("no figures here"), 0);
    }

    #[test]
    fn test_purchase_date_and_fingerprint() {
        let text = "STARBUCKS #4521\n03/14/2024 08:12\nLATTE GRANDE 5.45\nTOTAL 5.45";
        let a = assembler().assemble(text);
        let b = assembler().assemble(text);

        assert_eq!(a.purchase_date, NaiveDate::from_ymd_opt(2024, 3, 14));
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.id, b.id);
        assert_eq!(a.items, b.items);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn test_ticker_weights_from_items() {
        let receipt = assembler().assemble("TARGET\nTIDE PODS 12.99\nDORITOS 4.00\nTOTAL 16.99");
        let weights = receipt.ticker_weights();

        assert_eq!(weights.len(), 2);
        assert_eq!(weights[0].ticker.as_deref(), Some("PG"));
        assert!((weights[0].weight - 0.90 * 12.99).abs() < 1e-9);
        assert_eq!(weights[1].ticker.as_deref(), Some("PEP"));
    }

    #[test]
    fn test_ticker_weights_retailer_only() {
        let receipt = assembler().assemble("COSTCO WHOLESALE\nORGANIC KALE\n3.99\nTOTAL 3.99");
        let weights = receipt.ticker_weights();

        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].ticker.as_deref(), Some("COST"));
        assert_eq!(weights[0].weight, 1.0);
    }

    #[test]
    fn test_corrections_produce_new_receipt() {
        let original = assembler().assemble("CORNER BODEGA\nORGANIC KALE\n3.99\nTOTAL 3.99");
        let corrections = vec![
            Correction::retailer(&original, "BODG", "Bodega Holdings", "Grocery"),
            Correction::item(&original, 0, "CALM", "Cal-Maine", "Grocery").unwrap(),
        ];

        let corrected = original.with_corrections(&corrections);

        assert_ne!(corrected.id, original.id);
        assert_eq!(corrected.previous_receipt_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(corrected.retailer.ticker.as_deref(), Some("BODG"));
        assert_eq!(corrected.retailer.raw_name, "CORNER BODEGA");
        assert_eq!(corrected.items[0].ticker(), Some("CALM"));
        assert!(corrected.issues.is_empty());

        // the submitted receipt is untouched
        assert!(original.retailer.ticker.is_none());
        assert_eq!(original.unmapped_items().len(), 1);
    }
}
