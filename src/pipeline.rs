// 🧾 Receipt Pipeline - Text → Receipt → Allocation, plus the approval path
//
// Wires the static tables, mapping store, assembler, allocator and feedback
// loop together once at startup. Every call after that is synchronous and
// per-receipt.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::allocation::{Allocation, RoundUpAllocator};
use crate::brands::StaticTables;
use crate::config::Config;
use crate::error::AllocationResult;
use crate::feedback::FeedbackLoop;
use crate::mapping_store::{MappingStore, SqliteMappingStore};
use crate::parser::LineParser;
use crate::receipt::{Receipt, ReceiptAssembler};
use crate::resolver::Resolver;

/// A receipt together with its round-up split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReceipt {
    pub receipt: Receipt,
    pub round_up_cents: i64,
    pub allocations: Vec<Allocation>,
}

pub struct ReceiptPipeline {
    assembler: ReceiptAssembler,
    allocator: RoundUpAllocator,
    feedback: FeedbackLoop,
    store: Arc<dyn MappingStore>,
    round_up_cents: i64,
}

impl ReceiptPipeline {
    /// Open the SQLite store and load tables named by the config
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let tables = StaticTables::load(config)?;
        let store = SqliteMappingStore::open(&config.database_path)?;
        info!(database = ?config.database_path, "Mapping store opened");
        ReceiptPipeline::new(Arc::new(store), Arc::new(tables), config)
    }

    pub fn new(
        store: Arc<dyn MappingStore>,
        tables: Arc<StaticTables>,
        config: &Config,
    ) -> Result<Self> {
        let round_up_cents = config.round_up_cents()?;

        let parser = LineParser::new(tables.brands.clone());
        let resolver = Resolver::new(Arc::clone(&store), tables);

        Ok(ReceiptPipeline {
            assembler: ReceiptAssembler::new(parser, resolver),
            allocator: RoundUpAllocator::new(&config.default_ticker),
            feedback: FeedbackLoop::new(
                Arc::clone(&store),
                config.retailer_approval_confidence,
                config.brand_approval_confidence,
            ),
            store,
            round_up_cents,
        })
    }

    /// Parse, resolve and assemble one receipt; never fails
    pub fn process(&self, text: &str) -> Receipt {
        self.assembler.assemble(text)
    }

    /// Split the configured round-up across the receipt's tickers
    pub fn allocate(&self, receipt: &Receipt) -> AllocationResult<Vec<Allocation>> {
        self.allocate_with(receipt, self.round_up_cents)
    }

    pub fn allocate_with(
        &self,
        receipt: &Receipt,
        round_up_cents: i64,
    ) -> AllocationResult<Vec<Allocation>> {
        self.allocator
            .allocate(round_up_cents, &receipt.ticker_weights())
    }

    /// process + allocate with an optional one-off amount
    pub fn run(&self, text: &str, round_up_cents: Option<i64>) -> AllocationResult<ProcessedReceipt> {
        let round_up_cents = round_up_cents.unwrap_or(self.round_up_cents);
        let receipt = self.process(text);
        let allocations = self.allocate_with(&receipt, round_up_cents)?;

        Ok(ProcessedReceipt {
            receipt,
            round_up_cents,
            allocations,
        })
    }

    pub fn feedback(&self) -> &FeedbackLoop {
        &self.feedback
    }

    pub fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }

    pub fn round_up_cents(&self) -> i64 {
        self.round_up_cents
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AllocationError;
    use crate::feedback::Correction;

    fn pipeline() -> ReceiptPipeline {
        let store = Arc::new(SqliteMappingStore::open_in_memory().unwrap());
        ReceiptPipeline::new(store, Arc::new(StaticTables::default()), &Config::default()).unwrap()
    }

    fn split(allocations: &[Allocation]) -> Vec<(&str, i64)> {
        allocations
            .iter()
            .map(|a| (a.ticker.as_str(), a.amount_cents))
            .collect()
    }

    #[test]
    fn test_nike_end_to_end() {
        let result = pipeline()
            .run("NIKE STORE\n2\nAIR MAX\n89.99\nTOTAL 89.99", None)
            .unwrap();

        assert_eq!(result.receipt.retailer.ticker.as_deref(), Some("NKE"));
        assert_eq!(result.round_up_cents, 100);
        assert_eq!(split(&result.allocations), vec![("NKE", 100)]);
    }

    #[test]
    fn test_multi_brand_split_sums_exactly() {
        let p = pipeline();
        let receipt = p.process("TARGET\nTIDE PODS 12.99\nDORITOS 4.00\nTOTAL 16.99");

        // 11.691 : 3.60 of the weight
        let allocations = p.allocate(&receipt).unwrap();
        assert_eq!(split(&allocations), vec![("PG", 76), ("PEP", 24)]);

        let allocations = p.allocate_with(&receipt, 333).unwrap();
        assert_eq!(allocations.iter().map(|a| a.amount_cents).sum::<i64>(), 333);
    }

    #[test]
    fn test_retailer_only_receipt() {
        let p = pipeline();
        let receipt = p.process("COSTCO WHOLESALE\nORGANIC KALE\n3.99\nTOTAL 3.99");
        assert_eq!(split(&p.allocate(&receipt).unwrap()), vec![("COST", 100)]);
    }

    #[test]
    fn test_unresolved_receipt_falls_back() {
        let p = pipeline();
        let receipt = p.process("CORNER BODEGA\nMYSTERY SODA\n1.50\nTOTAL 1.50");
        assert_eq!(split(&p.allocate(&receipt).unwrap()), vec![("VTI", 100)]);

        let empty = p.process("");
        assert!(empty.needs_manual_review);
        assert_eq!(split(&p.allocate(&empty).unwrap()), vec![("VTI", 100)]);
    }

    #[test]
    fn test_invalid_amount_rejected() {
        let p = pipeline();
        let receipt = p.process("NIKE STORE\nAIR MAX 89.99");
        assert_eq!(
            p.allocate_with(&receipt, 0),
            Err(AllocationError::NonPositiveAmount(0))
        );
    }

    #[test]
    fn test_learning_loop_end_to_end() {
        let p = pipeline();
        let text = "CORNER BODEGA\nMYSTERY SODA\n1.50\nTOTAL 1.50";

        let receipt = p.process(text);
        let corrected = p
            .feedback()
            .submit_corrections(
                &receipt,
                &[Correction::retailer(&receipt, "BODG", "Bodega Holdings", "Grocery")],
                "reviewer",
            )
            .unwrap();
        assert_eq!(split(&p.allocate(&corrected).unwrap()), vec![("BODG", 100)]);

        // pending until promoted
        assert_eq!(split(&p.allocate(&p.process(text)).unwrap()), vec![("VTI", 100)]);

        p.feedback().promote("CORNER BODEGA", "supervisor").unwrap();
        let next = p.process(text);
        assert_eq!(next.retailer.ticker.as_deref(), Some("BODG"));

        p.feedback().approve_receipt(&next, "reviewer").unwrap();
        let records = p.store().all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].approved);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let p = pipeline();
        let text = "STARBUCKS #4521\n03/14/2024\nLATTE GRANDE 5.45\n2 @\nCROISSANT\n6.50\nTOTAL 11.95";

        let a = p.process(text);
        let b = p.process(text);
        assert_eq!(a.items, b.items);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.retailer, b.retailer);
    }
}
