// src/currency.rs
use crate::error::PaymentError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement currencies both ledgers accept.
///
/// The set is closed on purpose: currency validity is decided once, at the
/// boundary where a raw code enters the system, and the core only ever sees
/// the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Rub,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Rub];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Rub => "RUB",
        }
    }

    /// Resolve a raw currency code. Unknown codes are a `BadCurrency` error.
    pub fn from_code(code: &str) -> Result<Self, PaymentError> {
        match code {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "RUB" => Ok(Currency::Rub),
            other => Err(PaymentError::BadCurrency(other.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Monetary rounding used for every balance read: two decimals, with exact
/// halves rounded toward zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointTowardZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_code_roundtrip() {
        for currency in Currency::ALL {
            assert_eq!(Currency::from_code(currency.code()).unwrap(), currency);
        }
    }

    #[test]
    fn test_from_code_rejects_unknown() {
        let err = Currency::from_code("XBT").unwrap_err();
        assert!(matches!(err, PaymentError::BadCurrency(code) if code == "XBT"));
    }

    #[test]
    fn test_round_money_half_down() {
        assert_eq!(round_money(dec!(0.005)), dec!(0.00));
        assert_eq!(round_money(dec!(1.125)), dec!(1.12));
        assert_eq!(round_money(dec!(-1.125)), dec!(-1.12));
        assert_eq!(round_money(dec!(1.126)), dec!(1.13));
        assert_eq!(round_money(dec!(10.00)), dec!(10.00));
    }
}
