//! Concrete source adapters, one per external feed.

mod fx;
mod holdings;
mod inventory;
mod metals_api;
mod quote_page;

pub use fx::FxRateAdapter;
pub use holdings::{HoldingsArchiveAdapter, TrustHoldingsAdapter};
pub use inventory::InventoryReportAdapter;
pub use metals_api::MetalsApiAdapter;
pub use quote_page::{QuoteKind, QuotePageAdapter};
