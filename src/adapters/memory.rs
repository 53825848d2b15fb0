// src/adapters/memory.rs
use crate::account::{Account, PremiumTier};
use crate::currency::{Currency, round_money};
use crate::error::PaymentError;
use crate::payment::{Payment, PaymentStatus};
use crate::posting::{FlowDirection, LedgerBook, Posting, PostingBatch, PostingType};
use crate::StorageAdapter;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct MemoryStore {
    postings: Vec<Posting>,
    payments: HashMap<Uuid, Payment>,
    accounts: HashMap<Uuid, Account>,
    tiers: Vec<PremiumTier>,
}

/// In-memory adapter. The single mutex is the transactional scope: every
/// check-then-act sequence on a balance scope runs to completion before
/// another caller can observe or modify the store.
pub struct MemoryAdapter {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(MemoryStore::default())),
        }
    }

    fn scope_sum(
        postings: &[Posting],
        book: LedgerBook,
        owner: Uuid,
        currency: Currency,
    ) -> Decimal {
        postings
            .iter()
            .filter(|p| p.book() == book && p.owner == owner && p.currency == currency)
            .map(|p| p.amount)
            .sum()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn execute_postings(
        &self,
        batch: &PostingBatch,
    ) -> Result<Vec<Posting>, PaymentError> {
        let mut store = self.store.lock().unwrap();

        // Stage first: nothing lands until every entry has passed its
        // overdraw check against committed + already-staged postings.
        let mut staged: Vec<Posting> = Vec::with_capacity(batch.entries().len());
        for entry in batch.entries() {
            if entry.entry.direction() == FlowDirection::Outflow {
                let committed =
                    Self::scope_sum(&store.postings, entry.entry.book(), entry.owner, entry.currency);
                let pending =
                    Self::scope_sum(&staged, entry.entry.book(), entry.owner, entry.currency);
                if round_money(committed + pending) - entry.amount.abs() < Decimal::ZERO {
                    return Err(PaymentError::InsufficientFunds);
                }
            }
            staged.push(Posting::from_entry(entry));
        }

        store.postings.extend(staged.iter().cloned());
        Ok(staged)
    }

    async fn sum(
        &self,
        book: LedgerBook,
        owner: Uuid,
        currency: Currency,
    ) -> Result<Decimal, PaymentError> {
        let store = self.store.lock().unwrap();
        Ok(Self::scope_sum(&store.postings, book, owner, currency))
    }

    async fn sum_by_types(
        &self,
        book: LedgerBook,
        owner: Uuid,
        currency: Currency,
        tags: &[PostingType],
    ) -> Result<Decimal, PaymentError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .postings
            .iter()
            .filter(|p| {
                p.book() == book
                    && p.owner == owner
                    && p.currency == currency
                    && tags.contains(&p.entry)
            })
            .map(|p| p.amount)
            .sum())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), PaymentError> {
        let mut store = self.store.lock().unwrap();
        store.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, PaymentError> {
        let store = self.store.lock().unwrap();
        store
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| PaymentError::not_found("payment", id))
    }

    async fn find_payment_by_foreign_id(
        &self,
        foreign_id: &str,
    ) -> Result<Payment, PaymentError> {
        let store = self.store.lock().unwrap();
        store
            .payments
            .values()
            .find(|p| p.foreign_id.as_deref() == Some(foreign_id))
            .cloned()
            .ok_or_else(|| PaymentError::not_found("payment", foreign_id))
    }

    async fn set_payment_foreign(
        &self,
        id: Uuid,
        foreign_id: &str,
    ) -> Result<Payment, PaymentError> {
        let mut store = self.store.lock().unwrap();
        let payment = store
            .payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found("payment", id))?;
        payment.foreign_id = Some(foreign_id.to_string());
        payment.status = PaymentStatus::Pending;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<bool, PaymentError> {
        let mut store = self.store.lock().unwrap();
        let payment = store
            .payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found("payment", id))?;
        if payment.status.is_terminal() {
            return Ok(false);
        }
        payment.status = status;
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_account(&self, id: Uuid) -> Result<Account, PaymentError> {
        let store = self.store.lock().unwrap();
        store
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| PaymentError::not_found("account", id))
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), PaymentError> {
        let mut store = self.store.lock().unwrap();
        store.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn premium_tiers(&self, currency: Currency) -> Result<Vec<PremiumTier>, PaymentError> {
        let store = self.store.lock().unwrap();
        let mut tiers: Vec<PremiumTier> = store
            .tiers
            .iter()
            .filter(|t| t.currency == currency)
            .cloned()
            .collect();
        tiers.sort_by(|a, b| a.cash.cmp(&b.cash));
        Ok(tiers)
    }

    async fn set_premium_tier(&self, owner: Uuid, tier_id: i32) -> Result<(), PaymentError> {
        let mut store = self.store.lock().unwrap();
        let account = store
            .accounts
            .get_mut(&owner)
            .ok_or_else(|| PaymentError::not_found("account", owner))?;
        account.premium_tier = Some(tier_id);
        Ok(())
    }

    async fn insert_premium_tier(&self, tier: &PremiumTier) -> Result<(), PaymentError> {
        let mut store = self.store.lock().unwrap();
        store.tiers.push(tier.clone());
        Ok(())
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::{PostingEntry, WalletPostingType};
    use rust_decimal_macros::dec;

    fn entry(owner: Uuid, tag: WalletPostingType, amount: Decimal) -> PostingEntry {
        PostingEntry {
            owner,
            entry: PostingType::Wallet(tag),
            amount,
            currency: Currency::Usd,
            comment: String::new(),
            payment_id: None,
            order_ids: Vec::new(),
            related_user: None,
        }
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_postings() {
        let adapter = MemoryAdapter::new();
        let owner = Uuid::now_v7();

        let mut seed = PostingBatch::new();
        seed.push(entry(owner, WalletPostingType::InflowOther, dec!(10)));
        adapter.execute_postings(&seed).await.unwrap();

        // First entry alone would fit; the second overdraws, so neither
        // may land.
        let mut batch = PostingBatch::new();
        batch.push(entry(owner, WalletPostingType::OutflowOther, dec!(-6)));
        batch.push(entry(owner, WalletPostingType::OutflowOther, dec!(-6)));
        let err = adapter.execute_postings(&batch).await.unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientFunds));

        assert_eq!(
            adapter
                .sum(LedgerBook::Wallet, owner, Currency::Usd)
                .await
                .unwrap(),
            dec!(10)
        );
    }

    #[tokio::test]
    async fn test_batch_accounts_for_earlier_entries() {
        let adapter = MemoryAdapter::new();
        let owner = Uuid::now_v7();

        // Inflow and outflow in the same batch: the outflow must see the
        // inflow staged before it.
        let mut batch = PostingBatch::new();
        batch.push(entry(owner, WalletPostingType::InflowPayment, dec!(25)));
        batch.push(entry(owner, WalletPostingType::OutflowOrder, dec!(-25)));
        let postings = adapter.execute_postings(&batch).await.unwrap();
        assert_eq!(postings.len(), 2);
        assert_eq!(
            adapter
                .sum(LedgerBook::Wallet, owner, Currency::Usd)
                .await
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_transition_status_is_compare_and_set() {
        let adapter = MemoryAdapter::new();
        let payment = Payment::new(
            Uuid::now_v7(),
            dec!(10),
            Currency::Usd,
            "mockpay",
            String::new(),
            Vec::new(),
            Vec::new(),
            String::new(),
            None,
        );
        adapter.insert_payment(&payment).await.unwrap();

        assert!(adapter
            .transition_status(payment.id, PaymentStatus::Succeeded)
            .await
            .unwrap());
        assert!(!adapter
            .transition_status(payment.id, PaymentStatus::Failed)
            .await
            .unwrap());
        assert_eq!(
            adapter.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_books_are_isolated() {
        let adapter = MemoryAdapter::new();
        let owner = Uuid::now_v7();
        let mut batch = PostingBatch::new();
        batch.push(entry(owner, WalletPostingType::InflowOther, dec!(10)));
        adapter.execute_postings(&batch).await.unwrap();

        assert_eq!(
            adapter
                .sum(LedgerBook::Cashback, owner, Currency::Usd)
                .await
                .unwrap(),
            Decimal::ZERO
        );
    }
}
