//! Composite report model.
//!
//! A [`CompositeReport`] is built fresh on every scheduler tick from whatever
//! sources happened to respond. Each constituent is wrapped in [`Field`] so a
//! failed source marks only its own field unavailable and a stale cache serve
//! is never silent.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How current a served value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Unavailable,
}

/// A report field: a value with its freshness, or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field<T> {
    Fresh(T),
    Stale(T),
    Unavailable,
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Fresh(v) | Field::Stale(v) => Some(v),
            Field::Unavailable => None,
        }
    }

    pub fn freshness(&self) -> Freshness {
        match self {
            Field::Fresh(_) => Freshness::Fresh,
            Field::Stale(_) => Freshness::Stale,
            Field::Unavailable => Freshness::Unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Field::Unavailable)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Field::Stale(_))
    }
}

/// Combine two fields: fresh only if both are fresh, unavailable if either is.
pub fn combine2<A, B, T>(a: &Field<A>, b: &Field<B>, f: impl FnOnce(&A, &B) -> T) -> Field<T> {
    match (a.value(), b.value()) {
        (Some(av), Some(bv)) => {
            if a.is_stale() || b.is_stale() {
                Field::Stale(f(av, bv))
            } else {
                Field::Fresh(f(av, bv))
            }
        }
        _ => Field::Unavailable,
    }
}

// ── Source payloads ───────────────────────────────────────────

/// Spot or ETF quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Last traded price in USD.
    pub price: f64,
    pub change_pct: Option<f64>,
    pub previous_close: Option<f64>,
}

/// Futures contract quote (COMEX).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuturesQuote {
    pub price: f64,
    pub previous_close: Option<f64>,
    pub change_pct: Option<f64>,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
}

/// Shanghai futures quote, priced in CNY per kilogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShfeQuote {
    pub price_cny_kg: f64,
    pub change_pct: Option<f64>,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
}

/// ETF trust physical holdings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustHoldings {
    pub tonnes: f64,
    pub ounces: f64,
}

/// Troy ounces per metric tonne.
pub const OUNCES_PER_TONNE: f64 = 32_150.7;

/// Troy ounces per kilogram.
pub const OUNCES_PER_KG: f64 = 32.1507;

/// Ounces deliverable per futures contract.
pub const OUNCES_PER_CONTRACT: f64 = 5_000.0;

impl TrustHoldings {
    pub fn from_ounces(ounces: f64) -> Self {
        Self {
            tonnes: ounces / OUNCES_PER_TONNE,
            ounces,
        }
    }
}

/// Exchange warehouse stocks, in troy ounces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub registered: f64,
    pub eligible: f64,
    pub registered_prev: f64,
    pub eligible_prev: f64,
    pub registered_adjustment: f64,
    pub eligible_adjustment: f64,
}

impl Inventory {
    pub fn total(&self) -> f64 {
        self.registered + self.eligible
    }

    /// Registered share of total stocks, as a fraction.
    pub fn registered_share(&self) -> f64 {
        let total = self.total();
        if total > 0.0 {
            self.registered / total
        } else {
            0.0
        }
    }

    pub fn delta_registered(&self) -> f64 {
        self.registered - self.registered_prev
    }

    pub fn delta_eligible(&self) -> f64 {
        self.eligible - self.eligible_prev
    }
}

/// One delivery-bulletin row: contracts issued on an intent date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRow {
    pub intent_date: NaiveDate,
    pub daily: u64,
    pub cumulative: u64,
    /// Zero-based index of the bulletin page the row came from.
    pub page: usize,
}

// ── Composite ─────────────────────────────────────────────────

/// Ratios and spreads computed from constituent fields. Each is unavailable
/// whenever any of its inputs is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derived {
    /// SHFE price converted to USD per troy ounce.
    pub shfe_usd_oz: Field<f64>,
    /// SHFE USD/oz minus spot.
    pub shanghai_premium: Field<f64>,
    /// COMEX futures minus spot.
    pub futures_basis: Field<f64>,
    /// (futures OI x 5000 oz) / registered stocks.
    pub paper_to_physical: Field<f64>,
    /// Registered / (registered + eligible).
    pub registered_share: Field<f64>,
    /// Registered stocks / SLV trust ounces.
    pub slv_coverage: Field<f64>,
}

/// A detected trust-holdings move, produced by the alert cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsChange {
    pub trust: String,
    pub tonnes: f64,
    pub delta_tonnes: Option<f64>,
}

/// Day-over-day movements read back from the metric sink. `None` means no
/// history yet, which is not an availability failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deltas {
    pub comex_oi: Option<f64>,
    pub shfe_oi: Option<f64>,
    pub slv_tonnes: Option<f64>,
    pub gld_tonnes: Option<f64>,
}

/// The composite market report, one per tick. Never persisted by the core;
/// scalar constituents are forwarded to the metric sink as a side effect of
/// aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeReport {
    pub generated_at: DateTime<Utc>,
    pub spot_silver: Field<Quote>,
    pub spot_gold: Field<Quote>,
    pub comex: Field<FuturesQuote>,
    pub shfe: Field<ShfeQuote>,
    pub slv_price: Field<Quote>,
    pub gld_price: Field<Quote>,
    pub usd_cny: Field<f64>,
    pub slv_holdings: Field<TrustHoldings>,
    pub gld_holdings: Field<TrustHoldings>,
    pub inventory: Field<Inventory>,
    pub deliveries: Field<Vec<DeliveryRow>>,
    pub derived: Derived,
    pub deltas: Deltas,
    /// True when a trust's holdings moved since the last observation.
    pub holdings_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_accessors() {
        let f: Field<f64> = Field::Fresh(1.0);
        assert_eq!(f.value(), Some(&1.0));
        assert_eq!(f.freshness(), Freshness::Fresh);

        let s: Field<f64> = Field::Stale(2.0);
        assert!(s.is_stale());
        assert!(s.is_available());

        let u: Field<f64> = Field::Unavailable;
        assert_eq!(u.value(), None);
        assert_eq!(u.freshness(), Freshness::Unavailable);
    }

    #[test]
    fn combine_propagates_staleness() {
        let spot: Field<f64> = Field::Fresh(50.0);
        let fut: Field<f64> = Field::Stale(51.5);
        let basis = combine2(&fut, &spot, |f, s| f - s);
        assert_eq!(basis, Field::Stale(1.5));
    }

    #[test]
    fn combine_unavailable_when_input_missing() {
        let spot: Field<f64> = Field::Unavailable;
        let fut: Field<f64> = Field::Fresh(51.5);
        let basis = combine2(&fut, &spot, |f, s| f - s);
        assert_eq!(basis, Field::Unavailable);
    }

    #[test]
    fn inventory_derived_values() {
        let inv = Inventory {
            registered: 100.0,
            eligible: 300.0,
            registered_prev: 90.0,
            eligible_prev: 310.0,
            registered_adjustment: 0.0,
            eligible_adjustment: 0.0,
        };
        assert_eq!(inv.total(), 400.0);
        assert!((inv.registered_share() - 0.25).abs() < f64::EPSILON);
        assert_eq!(inv.delta_registered(), 10.0);
        assert_eq!(inv.delta_eligible(), -10.0);
    }

    #[test]
    fn holdings_from_ounces() {
        let h = TrustHoldings::from_ounces(OUNCES_PER_TONNE * 2.0);
        assert!((h.tonnes - 2.0).abs() < 1e-9);
    }
}
