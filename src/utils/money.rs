//! Presentation helpers for minor-unit amounts.
//!
//! Formatted strings are for display only. Every comparison and every
//! persisted value stays an integer amount of cents.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Gbp,
    Chf,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Chf => "CHF",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Currency::Eur => "€",
            Currency::Usd => "$",
            Currency::Gbp => "£",
            Currency::Chf => "CHF ",
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "GBP" => Ok(Currency::Gbp),
            "CHF" => Ok(Currency::Chf),
            other => Err(format!("unsupported currency '{other}'")),
        }
    }
}

/// Renders `4000` as `€40.00`.
pub fn format_amount(cents: i64, currency: Currency) -> String {
    let amount = Decimal::new(cents, 2);
    let sign = if amount.is_sign_negative() { "-" } else { "" };
    format!("{sign}{}{:.2}", currency.symbol(), amount.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(4000, Currency::Eur), "€40.00");
        assert_eq!(format_amount(5, Currency::Usd), "$0.05");
        assert_eq!(format_amount(0, Currency::Gbp), "£0.00");
        assert_eq!(format_amount(123_456, Currency::Chf), "CHF 1234.56");
        assert_eq!(format_amount(-250, Currency::Eur), "-€2.50");
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("eur".parse::<Currency>(), Ok(Currency::Eur));
        assert!("XYZ".parse::<Currency>().is_err());
    }
}
