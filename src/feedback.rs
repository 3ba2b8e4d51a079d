// 🔁 Learning Feedback Loop - Human approvals flow back into the mapping store
//
// Approving a receipt upserts every final retailer/brand assignment as an
// approved mapping (last-approved-wins, no confidence blending). Manual
// corrections are stored as pending and only take part in resolution after
// a second-level promotion.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::brands::normalize_key;
use crate::mapping_store::{MappingRecord, MappingStore};
use crate::receipt::Receipt;
use crate::resolver::{BrandMatch, MatchSource};

/// Confidence on a receipt for an assignment a human typed in
pub const MANUAL_CONFIDENCE: f64 = 1.0;

// ============================================================================
// CORRECTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionTarget {
    Retailer,
    /// Index into `Receipt.items`
    Item(usize),
}

/// A manual ticker assignment made while reviewing a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub receipt_id: String,
    pub target: CorrectionTarget,

    /// Name as it appeared on the receipt (becomes the mapping key)
    pub original_name: String,
    pub ticker: String,
    pub company_name: String,
    pub category: String,
    pub corrected_at: DateTime<Utc>,
}

impl Correction {
    pub fn retailer(receipt: &Receipt, ticker: &str, company_name: &str, category: &str) -> Self {
        Correction::build(
            receipt,
            CorrectionTarget::Retailer,
            &receipt.retailer.raw_name,
            ticker,
            company_name,
            category,
        )
    }

    /// None when the index is past the end of the item list
    pub fn item(
        receipt: &Receipt,
        index: usize,
        ticker: &str,
        company_name: &str,
        category: &str,
    ) -> Option<Self> {
        let item = receipt.items.get(index)?;
        Some(Correction::build(
            receipt,
            CorrectionTarget::Item(index),
            &item.name,
            ticker,
            company_name,
            category,
        ))
    }

    fn build(
        receipt: &Receipt,
        target: CorrectionTarget,
        original_name: &str,
        ticker: &str,
        company_name: &str,
        category: &str,
    ) -> Self {
        Correction {
            receipt_id: receipt.id.clone(),
            target,
            original_name: original_name.to_string(),
            ticker: ticker.trim().to_uppercase(),
            company_name: company_name.trim().to_string(),
            category: category.trim().to_string(),
            corrected_at: Utc::now(),
        }
    }

    pub fn to_brand_match(&self) -> BrandMatch {
        BrandMatch::new(
            &self.ticker,
            &self.company_name,
            &self.category,
            MANUAL_CONFIDENCE,
            MatchSource::LearnedMapping,
            &normalize_key(&self.original_name),
        )
    }
}

// ============================================================================
// APPROVAL SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSummary {
    /// Keys written as approved, in receipt order
    pub approved_keys: Vec<String>,

    /// Unresolved or payment lines that had nothing to approve
    pub skipped: usize,
}

// ============================================================================
// FEEDBACK LOOP
// ============================================================================

pub struct FeedbackLoop {
    store: Arc<dyn MappingStore>,
    retailer_confidence: f64,
    brand_confidence: f64,
}

impl FeedbackLoop {
    pub fn new(store: Arc<dyn MappingStore>, retailer_confidence: f64, brand_confidence: f64) -> Self {
        FeedbackLoop {
            store,
            retailer_confidence,
            brand_confidence,
        }
    }

    /// Approve every final assignment on a receipt
    pub fn approve_receipt(&self, receipt: &Receipt, actor: &str) -> Result<ApprovalSummary> {
        let mut summary = ApprovalSummary::default();

        let retailer = &receipt.retailer;
        match (&retailer.ticker, retailer.raw_name.is_empty()) {
            (Some(ticker), false) => {
                let record = MappingRecord::new(
                    &retailer.raw_name,
                    ticker,
                    &retailer.name,
                    retailer.category.as_deref().unwrap_or_default(),
                    self.retailer_confidence,
                );
                self.approve_record(record, actor, &mut summary)?;
            }
            _ => summary.skipped += 1,
        }

        for item in &receipt.items {
            let assignment = item
                .resolved_brand
                .as_ref()
                .and_then(|found| Some((found.ticker.as_deref()?, found)));

            match assignment {
                Some((ticker, found)) => {
                    let record = MappingRecord::new(
                        &item.name,
                        ticker,
                        found.company_name.as_deref().unwrap_or(ticker),
                        found.category.as_deref().unwrap_or_default(),
                        self.brand_confidence,
                    );
                    self.approve_record(record, actor, &mut summary)?;
                }
                None => summary.skipped += 1,
            }
        }

        info!(
            receipt_id = %receipt.id,
            approved = summary.approved_keys.len(),
            skipped = summary.skipped,
            "Receipt mappings approved"
        );

        Ok(summary)
    }

    /// Apply manual corrections: returns the new receipt and stores every
    /// correction as a pending mapping
    pub fn submit_corrections(
        &self,
        receipt: &Receipt,
        corrections: &[Correction],
        actor: &str,
    ) -> Result<Receipt> {
        let corrected = receipt.with_corrections(corrections);

        for correction in corrections {
            let confidence = match correction.target {
                CorrectionTarget::Retailer => self.retailer_confidence,
                CorrectionTarget::Item(_) => self.brand_confidence,
            };
            let record = MappingRecord::new(
                &correction.original_name,
                &correction.ticker,
                &correction.company_name,
                &correction.category,
                confidence,
            );
            if record.key.is_empty() {
                continue;
            }

            self.store.upsert(&record, actor)?;
            info!(key = %record.key, ticker = %record.ticker, "Manual mapping stored as pending");
        }

        Ok(corrected)
    }

    /// Store one approved mapping directly
    pub fn approve_mapping(
        &self,
        name: &str,
        ticker: &str,
        company_name: &str,
        category: &str,
        is_retailer: bool,
        actor: &str,
    ) -> Result<MappingRecord> {
        let confidence = if is_retailer {
            self.retailer_confidence
        } else {
            self.brand_confidence
        };
        let record = MappingRecord::new(name, ticker, company_name, category, confidence);
        let record = self.store.approve(record, actor)?;
        info!(key = %record.key, ticker = %record.ticker, "Mapping approved");
        Ok(record)
    }

    /// Second-level approval of a pending manual mapping
    pub fn promote(&self, name: &str, actor: &str) -> Result<Option<MappingRecord>> {
        let promoted = self.store.promote(name, actor)?;
        match &promoted {
            Some(record) => info!(key = %record.key, ticker = %record.ticker, "Pending mapping promoted"),
            None => info!(key = %normalize_key(name), "No pending mapping to promote"),
        }
        Ok(promoted)
    }

    fn approve_record(
        &self,
        record: MappingRecord,
        actor: &str,
        summary: &mut ApprovalSummary,
    ) -> Result<()> {
        if record.key.is_empty() || summary.approved_keys.contains(&record.key) {
            summary.skipped += 1;
            return Ok(());
        }

        let record = self.store.approve(record, actor)?;
        summary.approved_keys.push(record.key);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brands::StaticTables;
    use crate::mapping_store::InMemoryMappingStore;
    use crate::parser::LineParser;
    use crate::receipt::ReceiptAssembler;
    use crate::resolver::Resolver;

    struct Fixture {
        store: Arc<InMemoryMappingStore>,
        assembler: ReceiptAssembler,
        feedback: FeedbackLoop,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryMappingStore::new());
        let tables = Arc::new(StaticTables::default());
        let assembler = ReceiptAssembler::new(
            LineParser::new(tables.brands.clone()),
            Resolver::new(store.clone(), tables),
        );
        let feedback = FeedbackLoop::new(store.clone(), 0.95, 0.90);
        Fixture {
            store,
            assembler,
            feedback,
        }
    }

    #[test]
    fn test_approve_receipt_upserts_all_assignments() {
        let f = fixture();
        let receipt = f
            .assembler
            .assemble("NIKE STORE #211\n2\nAIR MAX\n89.99\nORGANIC KALE 3.99\nTOTAL 93.98");

        let summary = f.feedback.approve_receipt(&receipt, "reviewer").unwrap();

        assert_eq!(summary.approved_keys, vec!["nike store", "air max"]);
        assert_eq!(summary.skipped, 1);

        let retailer = f.store.lookup("nike store").unwrap().unwrap();
        assert_eq!(retailer.confidence, 0.95);
        assert!(retailer.approved);
        assert_eq!(f.store.lookup("air max").unwrap().unwrap().confidence, 0.90);
    }

    #[test]
    fn test_approved_mapping_applies_to_next_receipt() {
        let f = fixture();
        let first = f.assembler.assemble("CORNER BODEGA\nMYSTERY SODA\n1.50\nTOTAL 1.50");
        assert!(first.retailer.ticker.is_none());

        f.feedback
            .approve_mapping("MYSTERY SODA", "KDP", "Keurig Dr Pepper", "Beverages", false, "t")
            .unwrap();

        let second = f.assembler.assemble("CORNER BODEGA\nMYSTERY SODA\n1.50\nTOTAL 1.50");
        let found = second.items[0].resolved_brand.as_ref().unwrap();
        assert_eq!(found.ticker.as_deref(), Some("KDP"));
        assert_eq!(found.source, MatchSource::LearnedMapping);
        assert_eq!(found.confidence, 0.90);
    }

    #[test]
    fn test_corrections_stay_pending_until_promoted() {
        let f = fixture();
        let receipt = f.assembler.assemble("CORNER BODEGA\nMYSTERY SODA\n1.50\nTOTAL 1.50");

        let corrections = vec![
            Correction::retailer(&receipt, "bodg", "Bodega Holdings", "Grocery"),
            Correction::item(&receipt, 0, "KDP", "Keurig Dr Pepper", "Beverages").unwrap(),
        ];
        let corrected = f
            .feedback
            .submit_corrections(&receipt, &corrections, "reviewer")
            .unwrap();

        assert_eq!(corrected.retailer.ticker.as_deref(), Some("BODG"));
        assert_eq!(corrected.items[0].ticker(), Some("KDP"));
        assert!(receipt.items[0].ticker().is_none());

        // pending mappings do not resolve yet
        assert!(f.store.pending("mystery soda").unwrap().is_some());
        let again = f.assembler.assemble("CORNER BODEGA\nMYSTERY SODA\n1.50");
        assert!(again.items[0].ticker().is_none());

        let promoted = f.feedback.promote("Mystery Soda", "supervisor").unwrap().unwrap();
        assert!(promoted.approved);

        let after = f.assembler.assemble("CORNER BODEGA\nMYSTERY SODA\n1.50");
        assert_eq!(after.items[0].ticker(), Some("KDP"));

        f.feedback.promote("corner bodega", "supervisor").unwrap();
        let last = f.assembler.assemble("CORNER BODEGA\nMYSTERY SODA\n1.50");
        assert_eq!(last.retailer.ticker.as_deref(), Some("BODG"));
        assert_eq!(last.retailer.confidence, 0.95);
    }

    #[test]
    fn test_newest_approval_replaces_older() {
        let f = fixture();
        f.feedback
            .approve_mapping("acme", "OLD", "Old", "Misc", true, "a")
            .unwrap();
        f.feedback
            .approve_mapping("ACME", "NEW", "New", "Misc", false, "b")
            .unwrap();

        let record = f.store.lookup("acme").unwrap().unwrap();
        assert_eq!(record.ticker, "NEW");
        assert_eq!(record.confidence, 0.90);
    }

    #[test]
    fn test_promote_without_pending() {
        let f = fixture();
        assert!(f.feedback.promote("nothing here", "t").unwrap().is_none());
    }

    #[test]
    fn test_correction_index_out_of_range() {
        let f = fixture();
        let receipt = f.assembler.assemble("TEA\n2.50");
        assert!(Correction::item(&receipt, 5, "X", "X", "X").is_none());
    }
}
