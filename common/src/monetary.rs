//! Currency codes.
//!
//! Amounts themselves are plain `i64` values in the currency's smallest unit;
//! only the currency code needs a type of its own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Codes accepted by the account API.
    pub const SUPPORTED: [&'static str; 4] = ["IDR", "USD", "EUR", "CAD"];

    /// Check whether the code is one the account API accepts.
    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(&self.0.as_str())
    }

    pub fn idr() -> Self {
        Self::new("IDR")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Currency {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_normalised_to_uppercase() {
        let currency = Currency::new("idr");
        assert_eq!(currency.code(), "IDR");
        assert_eq!(currency, Currency::idr());
    }

    #[test]
    fn test_supported_currencies() {
        assert!(Currency::usd().is_supported());
        assert!(Currency::eur().is_supported());
        assert!(Currency::from("cad").is_supported());
        assert!(!Currency::from("XYZ").is_supported());
    }
}
