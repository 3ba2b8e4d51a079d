// 🧾 Line Parser - Raw OCR text → ordered line items
//
// OCR regularly splits "name / quantity / price" over two or three physical
// lines, so the parser scans top-to-bottom with a rolling window:
//
//   AwaitingName ──name──▶ HaveName ──qty──▶ HaveNameAndQuantity
//        ▲                    │                      │
//        └──── price (emit) ──┴──────────────────────┘
//
// Skip-keyword lines (totals, tax, tender...) reset the window. Parsing never
// fails: bad input just yields fewer (or zero) items.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::amount::{
    inline_item, is_date_or_time_line, is_valid_price, letter_count, price_on_line,
    quantity_on_line,
};
use crate::brands::BrandTable;
use crate::resolver::BrandMatch;

/// A pending name is dropped once this many lines pass without a price
pub const NAME_EXPIRY_LINES: usize = 5;

/// How far back a lone price looks for a name
pub const LOOK_BACK_LINES: usize = 2;

static SKIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:sub\s*-?\s*total|total|tax|cash|card|change|thank\s*you|thanks|balance|discount|cashier|tend(?:er|ered)?|savings|coupon|approved|auth(?:orization)?|ref(?:erence)?\s*#?|rewards|items?\s+sold|visa|mastercard|amex|debit)\b",
        // ambiguous words only count in their footer forms ("MEMBER'S MARK" is a brand)
        r"|\bmember\s*(?:#|id\b|no\b|number\b|since\b)",
        r"|\breceipt\s*(?:#|id\b|no\b|number\b|\d)",
        r"|\bcredit\s*(?:card\b|tend|:|\$?\d)",
        r"|^\s*(?:receipt|member|credit)\s*$",
    ))
    .unwrap()
});

// ============================================================================
// LINE ITEM
// ============================================================================

/// One purchased product.
///
/// Created by the parser; the resolver fills `resolved_brand` once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_amount_cents: i64,
    pub line_total_cents: i64,

    /// None until resolved, and for payment-method lines
    pub resolved_brand: Option<BrandMatch>,
}

impl LineItem {
    pub fn new(name: &str, quantity: u32, line_total_cents: i64) -> Self {
        let quantity = quantity.max(1);
        let unit = (line_total_cents as f64 / f64::from(quantity)).round() as i64;

        LineItem {
            name: name.trim().to_string(),
            quantity,
            unit_amount_cents: unit,
            line_total_cents,
            resolved_brand: None,
        }
    }

    pub fn line_total(&self) -> f64 {
        crate::amount::cents_to_dollars(self.line_total_cents)
    }

    pub fn ticker(&self) -> Option<&str> {
        self.resolved_brand.as_ref()?.ticker.as_deref()
    }
}

// ============================================================================
// LINE CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// totals, tax, tender... resets the window
    Skip,
    Price(i64),
    InlineItem { name: String, cents: i64 },
    Quantity(u32),
    Name,
    /// anything else (addresses, phone numbers, dates, stray tokens)
    Noise,
}

pub fn is_skip_line(line: &str) -> bool {
    SKIP_RE.is_match(line)
}

// ============================================================================
// WINDOW STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WindowState {
    /// A quantity may arrive before its name
    AwaitingName { quantity: Option<u32> },
    HaveName { name: String, line: usize },
    HaveNameAndQuantity { name: String, quantity: u32, line: usize },
}

impl Default for WindowState {
    fn default() -> Self {
        WindowState::AwaitingName { quantity: None }
    }
}

#[derive(Debug, Clone)]
struct SeenLine {
    text: String,
    kind: LineKind,
    consumed: bool,
}

impl SeenLine {
    /// Looser name test used only by look-back
    fn could_be_name(&self) -> bool {
        !self.consumed
            && match self.kind {
                LineKind::Name => true,
                LineKind::Noise => {
                    letter_count(&self.text) >= 2 && !is_date_or_time_line(&self.text)
                }
                _ => false,
            }
    }
}

/// Rolling name/quantity/price window over classified lines
#[derive(Debug, Clone, Default)]
pub struct ParseWindow {
    state: WindowState,
    seen: Vec<SeenLine>,
    items: Vec<LineItem>,
}

impl ParseWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    /// Feed one classified line; returns the item emitted by it, if any
    pub fn feed(&mut self, text: &str, kind: LineKind) -> Option<&LineItem> {
        let index = self.seen.len();
        self.seen.push(SeenLine {
            text: text.to_string(),
            kind: kind.clone(),
            consumed: false,
        });
        self.expire_stale_name(index);

        let before = self.items.len();
        let state = std::mem::take(&mut self.state);

        self.state = match (state, kind) {
            (_, LineKind::Skip) => WindowState::default(),

            (state, LineKind::Noise) => state,

            (WindowState::AwaitingName { .. }, LineKind::Quantity(quantity)) => {
                WindowState::AwaitingName {
                    quantity: Some(quantity),
                }
            }
            (WindowState::HaveName { name, line }, LineKind::Quantity(quantity))
            | (WindowState::HaveNameAndQuantity { name, line, .. }, LineKind::Quantity(quantity)) => {
                WindowState::HaveNameAndQuantity { name, quantity, line }
            }

            // a new name replaces the pending one but keeps its quantity
            (WindowState::AwaitingName { quantity: None }, LineKind::Name)
            | (WindowState::HaveName { .. }, LineKind::Name) => WindowState::HaveName {
                name: text.to_string(),
                line: index,
            },
            (WindowState::AwaitingName { quantity: Some(quantity) }, LineKind::Name)
            | (WindowState::HaveNameAndQuantity { quantity, .. }, LineKind::Name) => {
                WindowState::HaveNameAndQuantity {
                    name: text.to_string(),
                    quantity,
                    line: index,
                }
            }

            (state, LineKind::InlineItem { name, cents }) => {
                if is_valid_price(cents) {
                    let quantity = match state {
                        WindowState::AwaitingName { quantity } => quantity.unwrap_or(1),
                        WindowState::HaveNameAndQuantity { quantity, .. } => quantity,
                        WindowState::HaveName { .. } => 1,
                    };
                    self.emit(&name, quantity, cents, &[index]);
                    WindowState::default()
                } else {
                    debug!(line = index, cents, "Inline price out of range, ignored");
                    state
                }
            }

            (state, LineKind::Price(cents)) => {
                if !is_valid_price(cents) {
                    debug!(line = index, cents, "Price out of range, discarded as OCR noise");
                    state
                } else {
                    self.on_price(state, index, cents);
                    WindowState::default()
                }
            }
        };

        if self.items.len() > before {
            self.items.last()
        } else {
            None
        }
    }

    /// Items emitted so far; any still-pending name is dropped
    pub fn finish(self) -> Vec<LineItem> {
        if let WindowState::HaveName { name, .. } | WindowState::HaveNameAndQuantity { name, .. } =
            &self.state
        {
            debug!(name = %name, "Pending name without a price dropped at end of scan");
        }
        self.items
    }

    fn on_price(&mut self, state: WindowState, index: usize, cents: i64) {
        match state {
            WindowState::HaveName { name, line } => {
                self.emit(&name, 1, cents, &[line, index]);
            }
            WindowState::HaveNameAndQuantity { name, quantity, line } => {
                self.emit(&name, quantity, cents, &[line, index]);
            }
            WindowState::AwaitingName { quantity } => match self.look_back(index, quantity) {
                Some((name, quantity, used)) => {
                    let mut used = used;
                    used.push(index);
                    self.emit(&name, quantity, cents, &used);
                }
                None => {
                    debug!(line = index, cents, "Price without a name dropped");
                }
            },
        }
    }

    /// Search the previous lines for an unconsumed name (and quantity),
    /// stopping at skip lines and other prices
    fn look_back(
        &self,
        index: usize,
        pending_quantity: Option<u32>,
    ) -> Option<(String, u32, Vec<usize>)> {
        let start = index.saturating_sub(LOOK_BACK_LINES);
        let mut quantity: Option<(u32, usize)> = None;

        for i in (start..index).rev() {
            let seen = &self.seen[i];
            match seen.kind {
                LineKind::Skip | LineKind::Price(_) | LineKind::InlineItem { .. } => return None,
                LineKind::Quantity(q) if !seen.consumed && quantity.is_none() => {
                    quantity = Some((q, i));
                }
                _ if seen.could_be_name() => {
                    let mut used = vec![i];
                    let quantity = match quantity {
                        Some((q, line)) => {
                            used.push(line);
                            q
                        }
                        None => pending_quantity.unwrap_or(1),
                    };
                    return Some((seen.text.clone(), quantity, used));
                }
                _ => {}
            }
        }

        None
    }

    fn expire_stale_name(&mut self, index: usize) {
        let stale = match &self.state {
            WindowState::HaveName { line, .. } | WindowState::HaveNameAndQuantity { line, .. } => {
                index - line > NAME_EXPIRY_LINES
            }
            WindowState::AwaitingName { .. } => false,
        };

        if stale {
            debug!(line = index, "Pending name expired without a price");
            self.state = WindowState::default();
        }
    }

    fn emit(&mut self, name: &str, quantity: u32, cents: i64, used: &[usize]) {
        for &i in used {
            if let Some(seen) = self.seen.get_mut(i) {
                seen.consumed = true;
            }
        }
        self.items.push(LineItem::new(&clean_item_name(name), quantity, cents));
    }
}

// ============================================================================
// LINE PARSER
// ============================================================================

pub struct LineParser {
    brands: BrandTable,
}

impl LineParser {
    /// Parser that knows the given brand keywords when judging name lines
    pub fn new(brands: BrandTable) -> Self {
        LineParser { brands }
    }

    pub fn classify_line(&self, line: &str) -> LineKind {
        let line = line.trim();

        if line.is_empty() {
            return LineKind::Noise;
        }
        if is_skip_line(line) {
            return LineKind::Skip;
        }
        if let Some(cents) = price_on_line(line) {
            return LineKind::Price(cents);
        }
        if let Some((name, cents)) = inline_item(line) {
            return LineKind::InlineItem { name, cents };
        }
        if let Some(quantity) = quantity_on_line(line) {
            return LineKind::Quantity(quantity);
        }
        if self.is_name_candidate(line) {
            return LineKind::Name;
        }

        LineKind::Noise
    }

    fn is_name_candidate(&self, line: &str) -> bool {
        let letters = letter_count(line);
        if letters == 0 || is_date_or_time_line(line) {
            return false;
        }

        line.chars().count() > 8 || letters >= 4 || self.brands.mentions_keyword(line)
    }

    pub fn parse(&self, text: &str) -> Vec<LineItem> {
        self.parse_lines(&normalized_lines(text))
    }

    /// Parse pre-split lines
    pub fn parse_lines<S: AsRef<str>>(&self, lines: &[S]) -> Vec<LineItem> {
        self.parse_lines_with_header(lines, None)
    }

    /// Parse pre-split lines; the store-name line at `header` closes the
    /// window instead of opening an item, unless it carries a price itself
    pub fn parse_lines_with_header<S: AsRef<str>>(
        &self,
        lines: &[S],
        header: Option<usize>,
    ) -> Vec<LineItem> {
        let mut window = ParseWindow::new();

        for (index, line) in lines.iter().enumerate() {
            let line = collapse_whitespace(line.as_ref());
            let kind = match self.classify_line(&line) {
                LineKind::Name | LineKind::Noise if header == Some(index) => LineKind::Skip,
                kind => kind,
            };
            window.feed(&line, kind);
        }

        let items = window.finish();
        debug!(items = items.len(), lines = lines.len(), "Receipt lines parsed");
        items
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(BrandTable::with_defaults())
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Split OCR text into trimmed, whitespace-collapsed, non-empty lines
pub fn normalized_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect()
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop UPC/SKU digit runs and dangling tax flags from an item name
fn clean_item_name(name: &str) -> String {
    let words: Vec<&str> = name
        .split_whitespace()
        .filter(|word| !(word.len() >= 5 && word.chars().all(|c| c.is_ascii_digit())))
        .collect();

    let cleaned = match words.split_last() {
        Some((last, rest)) if !rest.is_empty() && matches!(*last, "T" | "F" | "N" | "X") => {
            rest.join(" ")
        }
        _ => words.join(" "),
    };

    if cleaned.is_empty() {
        name.trim().to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// TESTS
// ============================================================================
