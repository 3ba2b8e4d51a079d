// Receipt Round-Up - Core Library
// Receipt text → tickers → cent-exact round-up split, with a learning loop

pub mod amount;
pub mod brands;
pub mod db;
pub mod mapping_store;
pub mod parser;
pub mod resolver;
pub mod receipt;
pub mod allocation;
pub mod feedback;
pub mod pipeline;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use amount::{format_cents, parse_cents};
pub use brands::{BrandEntry, BrandTable, EntryKind, PatternRule, PatternTable, StaticTables};
pub use db::{setup_database, insert_event, get_events_for_entity, Event};
pub use mapping_store::{InMemoryMappingStore, MappingRecord, MappingStore, SqliteMappingStore};
pub use parser::{LineItem, LineKind, LineParser, ParseWindow, WindowState};
pub use resolver::{BrandMatch, MatchSource, Matcher, Resolver};
pub use receipt::{Receipt, ReceiptAssembler, Retailer, ReviewIssue};
pub use allocation::{Allocation, RoundUpAllocator, TickerWeight};
pub use feedback::{ApprovalSummary, Correction, CorrectionTarget, FeedbackLoop};
pub use pipeline::{ProcessedReceipt, ReceiptPipeline};
pub use config::Config;
pub use error::{AllocationError, AllocationResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
