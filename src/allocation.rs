// 💰 Round-Up Allocator - Cent-exact split of the round-up across tickers
//
// Weights are normalized to percentages, each share is rounded half-up to a
// cent, and the leftover drift is settled with the largest-remainder method
// so the split always sums to the round-up amount exactly.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::amount::cents_to_dollars;
use crate::error::{AllocationError, AllocationResult};

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// One (ticker, weight) input row. Rows without a ticker are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerWeight {
    pub ticker: Option<String>,
    pub weight: f64,
}

impl TickerWeight {
    pub fn new(ticker: &str, weight: f64) -> Self {
        TickerWeight {
            ticker: Some(ticker.to_string()),
            weight,
        }
    }

    pub fn unresolved(weight: f64) -> Self {
        TickerWeight {
            ticker: None,
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub ticker: String,
    pub amount_cents: i64,

    /// Normalized share of the weights among the returned rows, 0-100
    pub percentage: f64,
}

impl Allocation {
    pub fn amount(&self) -> f64 {
        cents_to_dollars(self.amount_cents)
    }
}

// ============================================================================
// ALLOCATOR
// ============================================================================

pub struct RoundUpAllocator {
    default_ticker: String,
}

/// Working row during reconciliation
struct Share {
    ticker: String,
    percentage: f64,
    raw_cents: f64,
    cents: i64,
}

impl Share {
    fn remainder(&self) -> f64 {
        self.raw_cents - self.cents as f64
    }
}

impl RoundUpAllocator {
    pub fn new(default_ticker: &str) -> Self {
        RoundUpAllocator {
            default_ticker: default_ticker.trim().to_uppercase(),
        }
    }

    pub fn default_ticker(&self) -> &str {
        &self.default_ticker
    }

    /// Split `round_up_cents` across the weighted tickers.
    ///
    /// Always returns allocations summing to `round_up_cents`, or an error.
    /// No usable ticker is not an error: the default ticker gets everything.
    pub fn allocate(
        &self,
        round_up_cents: i64,
        weights: &[TickerWeight],
    ) -> AllocationResult<Vec<Allocation>> {
        if round_up_cents <= 0 {
            return Err(AllocationError::NonPositiveAmount(round_up_cents));
        }

        let merged = merge_weights(weights)?;
        let total_weight: f64 = merged.iter().map(|(_, weight)| weight).sum();
        if !total_weight.is_finite() {
            return Err(AllocationError::WeightOverflow);
        }

        if merged.is_empty() || total_weight <= 0.0 {
            return self.fallback(round_up_cents);
        }

        let mut shares: Vec<Share> = merged
            .into_iter()
            .map(|(ticker, weight)| {
                let fraction = weight / total_weight;
                let raw_cents = fraction * round_up_cents as f64;
                Share {
                    ticker,
                    percentage: fraction * 100.0,
                    raw_cents,
                    cents: round_half_up(raw_cents),
                }
            })
            .collect();

        reconcile(&mut shares, round_up_cents);

        // zero-cent shares are dropped, the rest are re-based to 100%
        shares.retain(|share| share.cents > 0);
        let kept_percentage: f64 = shares.iter().map(|share| share.percentage).sum();

        let allocations: Vec<Allocation> = shares
            .into_iter()
            .map(|share| Allocation {
                ticker: share.ticker,
                amount_cents: share.cents,
                percentage: share.percentage / kept_percentage * 100.0,
            })
            .collect();

        info!(
            round_up_cents,
            tickers = allocations.len(),
            "Round-up allocated"
        );

        Ok(allocations)
    }

    fn fallback(&self, round_up_cents: i64) -> AllocationResult<Vec<Allocation>> {
        if self.default_ticker.is_empty() {
            return Err(AllocationError::MissingDefaultTicker);
        }

        info!(
            round_up_cents,
            ticker = %self.default_ticker,
            "No resolved ticker, allocating to default"
        );

        Ok(vec![Allocation {
            ticker: self.default_ticker.clone(),
            amount_cents: round_up_cents,
            percentage: 100.0,
        }])
    }
}

/// Drop rows without a ticker or with zero weight, then sum duplicate
/// tickers in first-seen order
pub fn merge_weights(weights: &[TickerWeight]) -> AllocationResult<Vec<(String, f64)>> {
    let mut merged: Vec<(String, f64)> = Vec::new();

    for entry in weights {
        let Some(ticker) = entry.ticker.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            continue;
        };

        if !entry.weight.is_finite() || entry.weight < 0.0 {
            return Err(AllocationError::MalformedWeight {
                ticker: ticker.to_string(),
                weight: entry.weight,
            });
        }
        if entry.weight == 0.0 {
            continue;
        }

        let ticker = ticker.to_uppercase();
        match merged.iter_mut().find(|(existing, _)| *existing == ticker) {
            Some((_, weight)) => *weight += entry.weight,
            None => merged.push((ticker, entry.weight)),
        }
    }

    Ok(merged)
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Largest-remainder settlement of the rounding drift.
///
/// Short: one cent each to the largest `raw - rounded`, ties to first-seen.
/// Over: one cent each from the smallest `raw - rounded` among non-zero
/// shares, ties to last-seen.
fn reconcile(shares: &mut [Share], target_cents: i64) {
    let mut residual = target_cents - shares.iter().map(|s| s.cents).sum::<i64>();
    if residual == 0 {
        return;
    }

    debug!(residual, "Reconciling rounding drift");

    while residual > 0 {
        let mut best = 0;
        for index in 1..shares.len() {
            if shares[index].remainder() > shares[best].remainder() {
                best = index;
            }
        }
        shares[best].cents += 1;
        residual -= 1;
    }

    while residual < 0 {
        let mut pick: Option<usize> = None;
        for index in 0..shares.len() {
            if shares[index].cents == 0 {
                continue;
            }
            match pick {
                Some(current) if shares[index].remainder() > shares[current].remainder() => {}
                _ => pick = Some(index),
            }
        }

        // sum of cents exceeds a positive target, so some share is non-zero
        let Some(index) = pick else { break };
        shares[index].cents -= 1;
        residual += 1;
    }
}

// ============================================================================
// TESTS
// ============================================================================
