use serde::{Deserialize, Serialize};

/// Postal address used for billing, shipping and tax zone matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub full_name: String,
    pub line1: String,
    pub city: String,
    pub zipcode: String,
    /// ISO 3166-1 alpha-2.
    pub country_iso: String,
    pub state_code: Option<String>,
}

/// Zone used to pick tax rates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxZone {
    pub name: String,
}

impl TaxZone {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Resolves the tax zone for an address.
///
/// The order falls back to [`TaxZoneMatcher::default_tax_zone`] when no zone
/// matches (or there is no tax address yet).
pub trait TaxZoneMatcher: Send + Sync {
    fn match_zone(&self, address: &Address) -> Option<TaxZone>;

    fn default_tax_zone(&self) -> Option<TaxZone> {
        None
    }
}
