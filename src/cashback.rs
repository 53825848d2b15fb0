// src/cashback.rs
use crate::currency::{Currency, round_money};
use crate::error::PaymentError;
use crate::posting::{LedgerBook, Posting, PostingBatch, PostingEntry, PostingRequest};
use crate::{LedgerStore, StorageAdapter};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Bounded reward sub-ledger. Same sign and overdraw rules as the wallet,
/// scoped to the cashback book; no tier side effect.
pub struct CashbackLedger {
    adapter: Arc<dyn StorageAdapter>,
}

impl CashbackLedger {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// Cap cashback usage at both the remaining need after balance and the
    /// available cashback credit. Never negative.
    pub async fn calculate_cashback(
        &self,
        owner: Uuid,
        currency: Currency,
        amount: Decimal,
        final_balance: Decimal,
    ) -> Result<Decimal, PaymentError> {
        let balance = self.sum(owner, currency).await?;
        Ok(balance.min(amount - final_balance).max(Decimal::ZERO))
    }
}

#[async_trait]
impl LedgerStore for CashbackLedger {
    fn book(&self) -> LedgerBook {
        LedgerBook::Cashback
    }

    async fn sum(&self, owner: Uuid, currency: Currency) -> Result<Decimal, PaymentError> {
        let sum = self
            .adapter
            .sum(LedgerBook::Cashback, owner, currency)
            .await?;
        Ok(round_money(sum))
    }

    async fn create(&self, request: PostingRequest) -> Result<Posting, PaymentError> {
        if request.entry.book() != LedgerBook::Cashback {
            return Err(PaymentError::BadParameter(
                "cashback ledger only accepts cashback posting tags".to_string(),
            ));
        }
        request.entry.validate_sign(request.amount)?;

        let mut batch = PostingBatch::new();
        batch.push(PostingEntry::from_request(request, None));

        let mut postings = self.adapter.execute_postings(&batch).await?;
        postings
            .pop()
            .ok_or_else(|| PaymentError::Storage("empty batch result".to_string()))
    }
}
