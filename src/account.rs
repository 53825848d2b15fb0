// src/account.rs
use crate::currency::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolved owner reference the core operates on.
///
/// Resolution from raw ids, session data or request payloads happens at the
/// boundary; by the time an `Account` reaches a ledger it is already a known
/// entity with a valid currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub locale: String,
    pub currency: Currency,
    pub premium_tier: Option<i32>,
}

impl Account {
    pub fn new(name: impl Into<String>, locale: impl Into<String>, currency: Currency) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            locale: locale.into(),
            currency,
            premium_tier: None,
        }
    }
}

/// One rung of the premium ladder for a currency.
///
/// Tiers are ordered by (cash threshold, id); an account's tier only ever
/// moves up the ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumTier {
    pub id: i32,
    pub currency: Currency,
    pub cash: Decimal,
    pub title: String,
}
