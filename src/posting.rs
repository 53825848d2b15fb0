// src/posting.rs
use crate::currency::Currency;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which sub-ledger a posting lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBook {
    Wallet,
    Cashback,
}

impl LedgerBook {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerBook::Wallet => "wallet",
            LedgerBook::Cashback => "cashback",
        }
    }
}

/// Flow direction fixed by a posting's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    Inflow,
    Outflow,
}

/// Posting reasons in the wallet book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletPostingType {
    InflowCreate,
    InflowPayment,
    InflowRefund,
    InflowRefBonus,
    InflowUserJob,
    InflowEarned,
    InflowOther,
    OutflowOrder,
    OutflowCancelRefBonus,
    OutflowCancelRefund,
    OutflowDestroy,
    OutflowOther,
}

impl WalletPostingType {
    /// Inflow tags that represent money actually paid in, as opposed to
    /// bonuses. Used for the payments-only sum and the tier ladder.
    pub const PAYMENT_TYPES: [WalletPostingType; 2] =
        [WalletPostingType::InflowPayment, WalletPostingType::InflowCreate];

    pub const INFLOW_TYPES: [WalletPostingType; 7] = [
        WalletPostingType::InflowCreate,
        WalletPostingType::InflowPayment,
        WalletPostingType::InflowRefund,
        WalletPostingType::InflowRefBonus,
        WalletPostingType::InflowUserJob,
        WalletPostingType::InflowEarned,
        WalletPostingType::InflowOther,
    ];

    pub fn direction(&self) -> FlowDirection {
        match self {
            WalletPostingType::InflowCreate
            | WalletPostingType::InflowPayment
            | WalletPostingType::InflowRefund
            | WalletPostingType::InflowRefBonus
            | WalletPostingType::InflowUserJob
            | WalletPostingType::InflowEarned
            | WalletPostingType::InflowOther => FlowDirection::Inflow,
            WalletPostingType::OutflowOrder
            | WalletPostingType::OutflowCancelRefBonus
            | WalletPostingType::OutflowCancelRefund
            | WalletPostingType::OutflowDestroy
            | WalletPostingType::OutflowOther => FlowDirection::Outflow,
        }
    }

    /// Whether this tag counts toward the premium tier ladder.
    pub fn qualifies_for_tier(&self) -> bool {
        matches!(
            self,
            WalletPostingType::InflowPayment | WalletPostingType::InflowCreate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletPostingType::InflowCreate => "inflow_create",
            WalletPostingType::InflowPayment => "inflow_payment",
            WalletPostingType::InflowRefund => "inflow_refund",
            WalletPostingType::InflowRefBonus => "inflow_ref_bonus",
            WalletPostingType::InflowUserJob => "inflow_user_job",
            WalletPostingType::InflowEarned => "inflow_earned",
            WalletPostingType::InflowOther => "inflow_other",
            WalletPostingType::OutflowOrder => "outflow_order",
            WalletPostingType::OutflowCancelRefBonus => "outflow_cancel_ref_bonus",
            WalletPostingType::OutflowCancelRefund => "outflow_cancel_refund",
            WalletPostingType::OutflowDestroy => "outflow_destroy",
            WalletPostingType::OutflowOther => "outflow_other",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "inflow_create" => Some(WalletPostingType::InflowCreate),
            "inflow_payment" => Some(WalletPostingType::InflowPayment),
            "inflow_refund" => Some(WalletPostingType::InflowRefund),
            "inflow_ref_bonus" => Some(WalletPostingType::InflowRefBonus),
            "inflow_user_job" => Some(WalletPostingType::InflowUserJob),
            "inflow_earned" => Some(WalletPostingType::InflowEarned),
            "inflow_other" => Some(WalletPostingType::InflowOther),
            "outflow_order" => Some(WalletPostingType::OutflowOrder),
            "outflow_cancel_ref_bonus" => Some(WalletPostingType::OutflowCancelRefBonus),
            "outflow_cancel_refund" => Some(WalletPostingType::OutflowCancelRefund),
            "outflow_destroy" => Some(WalletPostingType::OutflowDestroy),
            "outflow_other" => Some(WalletPostingType::OutflowOther),
            _ => None,
        }
    }
}

/// Posting reasons in the cashback book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashbackPostingType {
    InflowCreate,
    InflowPayment,
    OutflowOrder,
}

impl CashbackPostingType {
    pub fn direction(&self) -> FlowDirection {
        match self {
            CashbackPostingType::InflowCreate | CashbackPostingType::InflowPayment => {
                FlowDirection::Inflow
            }
            CashbackPostingType::OutflowOrder => FlowDirection::Outflow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CashbackPostingType::InflowCreate => "inflow_create",
            CashbackPostingType::InflowPayment => "inflow_payment",
            CashbackPostingType::OutflowOrder => "outflow_order",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "inflow_create" => Some(CashbackPostingType::InflowCreate),
            "inflow_payment" => Some(CashbackPostingType::InflowPayment),
            "outflow_order" => Some(CashbackPostingType::OutflowOrder),
            _ => None,
        }
    }
}

/// Closed union of posting tags across both books.
///
/// The variant decides which book a posting lands in; there is no dynamic
/// routing and no fallback branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingType {
    Wallet(WalletPostingType),
    Cashback(CashbackPostingType),
}

impl PostingType {
    pub fn book(&self) -> LedgerBook {
        match self {
            PostingType::Wallet(_) => LedgerBook::Wallet,
            PostingType::Cashback(_) => LedgerBook::Cashback,
        }
    }

    pub fn direction(&self) -> FlowDirection {
        match self {
            PostingType::Wallet(tag) => tag.direction(),
            PostingType::Cashback(tag) => tag.direction(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PostingType::Wallet(tag) => tag.as_str(),
            PostingType::Cashback(tag) => tag.as_str(),
        }
    }

    /// Rebuild a tag from its stored (book, tag) pair.
    pub fn from_parts(book: &str, tag: &str) -> Result<Self, PaymentError> {
        let entry = match book {
            "wallet" => WalletPostingType::from_tag(tag).map(PostingType::Wallet),
            "cashback" => CashbackPostingType::from_tag(tag).map(PostingType::Cashback),
            _ => None,
        };
        entry.ok_or_else(|| {
            PaymentError::Storage(format!("unknown posting tag: {book}/{tag}"))
        })
    }

    /// Check the amount sign against this tag's flow direction.
    pub fn validate_sign(&self, amount: Decimal) -> Result<(), PaymentError> {
        match self.direction() {
            FlowDirection::Inflow if amount < Decimal::ZERO => Err(PaymentError::BadParameter(
                "inflow postings require a non-negative amount".to_string(),
            )),
            FlowDirection::Outflow if amount > Decimal::ZERO => Err(PaymentError::BadParameter(
                "outflow postings require a non-positive amount".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// One signed, immutable ledger entry.
///
/// Invariants:
/// - the amount sign matches the tag's flow direction
/// - ledgers are append-only: corrections are new offsetting postings
/// - `related_user` is only carried by wallet postings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub id: Uuid,
    pub owner: Uuid,
    pub entry: PostingType,
    pub amount: Decimal,
    pub currency: Currency,
    pub comment: String,
    pub payment_id: Option<Uuid>,
    pub order_ids: Vec<Uuid>,
    pub related_user: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Posting {
    pub(crate) fn from_entry(entry: &PostingEntry) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner: entry.owner,
            entry: entry.entry,
            amount: entry.amount,
            currency: entry.currency,
            comment: entry.comment.clone(),
            payment_id: entry.payment_id,
            order_ids: entry.order_ids.clone(),
            related_user: entry.related_user,
            created_at: Utc::now(),
        }
    }

    pub fn book(&self) -> LedgerBook {
        self.entry.book()
    }
}

/// Inputs for a single ledger posting.
#[derive(Debug, Clone)]
pub struct PostingRequest {
    pub owner: Uuid,
    pub entry: PostingType,
    pub amount: Decimal,
    pub currency: Currency,
    pub comment: String,
    pub payment_id: Option<Uuid>,
    pub order_ids: Vec<Uuid>,
}

/// One validated entry awaiting atomic execution.
#[derive(Debug, Clone)]
pub struct PostingEntry {
    pub owner: Uuid,
    pub entry: PostingType,
    pub amount: Decimal,
    pub currency: Currency,
    pub comment: String,
    pub payment_id: Option<Uuid>,
    pub order_ids: Vec<Uuid>,
    pub related_user: Option<Uuid>,
}

impl PostingEntry {
    pub fn from_request(request: PostingRequest, related_user: Option<Uuid>) -> Self {
        Self {
            owner: request.owner,
            entry: request.entry,
            amount: request.amount,
            currency: request.currency,
            comment: request.comment,
            payment_id: request.payment_id,
            order_ids: request.order_ids,
            related_user,
        }
    }
}

/// Ordered set of postings the adapter must commit together.
#[derive(Debug, Clone, Default)]
pub struct PostingBatch {
    entries: Vec<PostingEntry>,
}

impl PostingBatch {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: PostingEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PostingEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owners whose balance scopes the adapter must lock before applying.
    pub fn lock_owners(&self) -> Vec<Uuid> {
        let mut owners: Vec<Uuid> = self.entries.iter().map(|e| e.owner).collect();
        owners.sort();
        owners.dedup();
        owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tag_directions() {
        assert_eq!(
            WalletPostingType::InflowPayment.direction(),
            FlowDirection::Inflow
        );
        assert_eq!(
            WalletPostingType::OutflowOrder.direction(),
            FlowDirection::Outflow
        );
        assert_eq!(
            CashbackPostingType::OutflowOrder.direction(),
            FlowDirection::Outflow
        );
    }

    #[test]
    fn test_validate_sign_inflow_rejects_negative() {
        let entry = PostingType::Wallet(WalletPostingType::InflowPayment);
        assert!(entry.validate_sign(dec!(10)).is_ok());
        assert!(entry.validate_sign(Decimal::ZERO).is_ok());
        assert!(matches!(
            entry.validate_sign(dec!(-10)),
            Err(PaymentError::BadParameter(_))
        ));
    }

    #[test]
    fn test_validate_sign_outflow_rejects_positive() {
        let entry = PostingType::Cashback(CashbackPostingType::OutflowOrder);
        assert!(entry.validate_sign(dec!(-10)).is_ok());
        assert!(entry.validate_sign(Decimal::ZERO).is_ok());
        assert!(matches!(
            entry.validate_sign(dec!(10)),
            Err(PaymentError::BadParameter(_))
        ));
    }

    #[test]
    fn test_tag_roundtrip_through_parts() {
        let wallet = PostingType::Wallet(WalletPostingType::OutflowCancelRefBonus);
        let rebuilt = PostingType::from_parts("wallet", wallet.as_str()).unwrap();
        assert_eq!(rebuilt, wallet);

        let cashback = PostingType::Cashback(CashbackPostingType::InflowPayment);
        let rebuilt = PostingType::from_parts("cashback", cashback.as_str()).unwrap();
        assert_eq!(rebuilt, cashback);

        assert!(PostingType::from_parts("wallet", "no_such_tag").is_err());
    }

    #[test]
    fn test_lock_owners_dedups() {
        let owner = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut batch = PostingBatch::new();
        for target in [owner, other, owner] {
            batch.push(PostingEntry {
                owner: target,
                entry: PostingType::Wallet(WalletPostingType::InflowPayment),
                amount: dec!(1),
                currency: Currency::Usd,
                comment: String::new(),
                payment_id: None,
                order_ids: Vec::new(),
                related_user: None,
            });
        }
        assert_eq!(batch.lock_owners().len(), 2);
    }
}
