// 💵 Amount Helpers - Cents, prices, quantities and dates on OCR lines
//
// Every amount inside the crate is integer cents (i64). Floats only appear
// at the edges (display, weights).

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

// ============================================================================
// BOUNDS
// ============================================================================

/// Smallest price accepted on a line item ($0.01)
pub const MIN_PRICE_CENTS: i64 = 1;

/// Largest price accepted on a line item ($10,000.00)
pub const MAX_PRICE_CENTS: i64 = 1_000_000;

/// Largest receipt total accepted ($100,000.00)
pub const MAX_TOTAL_CENTS: i64 = 10_000_000;

// ============================================================================
// PATTERNS
// ============================================================================

/// A line that is only a price: "89.99", "$1,204.50", "3.49 F", "0.59 N"
static PRICE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[$€£]?\s*((?:\d{1,3}(?:,\d{3})+|\d+)\.\d{2})(?:\s*[tfnx*])?$").unwrap()
});

/// A name followed by a trailing price on the same line: "BANANAS 0.59"
static INLINE_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<name>.*[a-z].*?)\s+[$€£]?\s*(?P<amount>(?:\d{1,3}(?:,\d{3})+|\d+)\.\d{2})(?:\s*[tfnx*])?$",
    )
    .unwrap()
});

/// "2", "2x", "2 @", "QTY 2", "QTY: 2", "x2"
static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:qty:?\s*|x\s*)?(\d{1,3})(?:\s*[x@])?$").unwrap()
});

/// Any currency figure inside a longer line
pub(crate) static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$€£]?\s*(?:\d{1,3}(?:,\d{3})+|\d+)\.\d{2}").unwrap()
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}[/-]\d{1,2}[/-](?:\d{4}|\d{2}))\b").unwrap()
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d{1,2}:\d{2}(?::\d{2})?(?:\s*[ap]m)?\b").unwrap()
});

// ============================================================================
// CENTS
// ============================================================================

/// Parse a decimal money string into cents.
///
/// Accepts an optional currency symbol, thousands separators and up to two
/// fractional digits; a third fractional digit rounds half-up.
///
/// # Examples:
/// ```
/// use receipt_roundup::amount::parse_cents;
/// assert_eq!(parse_cents("$1,234.56"), Some(123456));
/// assert_eq!(parse_cents("1.5"), Some(150));
/// assert_eq!(parse_cents("abc"), None);
/// ```
pub fn parse_cents(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(['$', '€', '£'])
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect();

    let negative = cleaned.starts_with('-');
    let body = cleaned.trim_start_matches('-');

    let (whole, frac) = body.split_once('.').unwrap_or((body, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole_value: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };

    let mut digits = frac.chars().filter_map(|c| c.to_digit(10)).map(i64::from);
    let tenths = digits.next().unwrap_or(0);
    let hundredths = digits.next().unwrap_or(0);
    let carry = i64::from(digits.next().map_or(false, |d| d >= 5));

    let cents = whole_value
        .checked_mul(100)?
        .checked_add(tenths * 10 + hundredths + carry)?;

    Some(if negative { -cents } else { cents })
}

pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// "$1,234.56" style rendering for CLI output
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let whole = (abs / 100).to_string();

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}${}.{:02}", sign, grouped, abs % 100)
}

pub fn is_valid_price(cents: i64) -> bool {
    (MIN_PRICE_CENTS..=MAX_PRICE_CENTS).contains(&cents)
}

// ============================================================================
// LINE CLASSIFIERS
// ============================================================================

/// Price carried by a price-only line (no range check)
pub fn price_on_line(line: &str) -> Option<i64> {
    let caps = PRICE_LINE_RE.captures(line.trim())?;
    parse_cents(caps.get(1)?.as_str())
}

/// Name and trailing price of a single-line item
pub fn inline_item(line: &str) -> Option<(String, i64)> {
    let caps = INLINE_ITEM_RE.captures(line.trim())?;
    let name = caps.name("name")?.as_str().trim().to_string();
    let cents = parse_cents(caps.name("amount")?.as_str())?;
    Some((name, cents))
}

/// Quantity carried by a quantity-only line; zero is not a quantity
pub fn quantity_on_line(line: &str) -> Option<u32> {
    let caps = QUANTITY_RE.captures(line.trim())?;
    let quantity: u32 = caps.get(1)?.as_str().parse().ok()?;
    (quantity > 0).then_some(quantity)
}

pub fn is_date_or_time_line(line: &str) -> bool {
    DATE_RE.is_match(line) || TIME_RE.is_match(line)
}

/// First calendar date found on a line
pub fn parse_date(line: &str) -> Option<NaiveDate> {
    let found = DATE_RE.find(line)?.as_str();

    let iso = found.len() == 10 && found.as_bytes().get(4) == Some(&b'-');
    let short_year = found
        .rsplit(['/', '-'])
        .next()
        .map_or(false, |year| year.len() == 2);

    let formats: &[&str] = if iso {
        &["%Y-%m-%d"]
    } else if short_year {
        &["%m/%d/%y", "%m-%d-%y"]
    } else {
        &["%m/%d/%Y", "%m-%d-%Y"]
    };

    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(found, format).ok())
}

pub fn letter_count(line: &str) -> usize {
    line.chars().filter(|c| c.is_alphabetic()).count()
}

// ============================================================================
// TESTS
// ============================================================================
