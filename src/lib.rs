// src/lib.rs
pub mod account;
pub mod adapters;
pub mod cashback;
pub mod currency;
pub mod error;
pub mod gateway;
pub mod order;
pub mod orchestrator;
pub mod payment;
pub mod posting;
pub mod wallet;

pub use account::{Account, PremiumTier};
pub use cashback::CashbackLedger;
pub use currency::{Currency, round_money};
pub use error::PaymentError;
pub use gateway::{
    ChargeData, GeoResolver, HookRequest, HookResponse, PaymentGateway, RemotePayment,
    RemotePaymentRequest,
};
pub use order::{Order, OrderStore, PriceSource, ServicePrice};
pub use orchestrator::{AmountSplit, CreatedPayment, OrchestratorConfig, PaymentOrchestrator};
pub use payment::{Payment, PaymentStatus, PlannedPosting};
pub use posting::{
    CashbackPostingType, FlowDirection, LedgerBook, Posting, PostingBatch, PostingEntry,
    PostingRequest, PostingType, WalletPostingType,
};
pub use wallet::WalletLedger;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Persistence seam for postings, payments, accounts and tiers.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Commit every entry in the batch atomically.
    /// Implementors MUST:
    /// 1. BEGIN a transaction
    /// 2. lock the balance scopes of the owners in `batch.lock_owners()`
    /// 3. apply entries in order, re-checking each outflow against the
    ///    current sum, entries applied earlier in the batch included;
    ///    `InsufficientFunds` aborts the whole batch
    /// 4. COMMIT on success, ROLLBACK on any error
    async fn execute_postings(&self, batch: &PostingBatch)
    -> Result<Vec<Posting>, PaymentError>;

    // READ OPERATIONS
    async fn sum(
        &self,
        book: LedgerBook,
        owner: Uuid,
        currency: Currency,
    ) -> Result<Decimal, PaymentError>;
    async fn sum_by_types(
        &self,
        book: LedgerBook,
        owner: Uuid,
        currency: Currency,
        tags: &[PostingType],
    ) -> Result<Decimal, PaymentError>;

    // PAYMENTS
    async fn insert_payment(&self, payment: &Payment) -> Result<(), PaymentError>;
    async fn get_payment(&self, id: Uuid) -> Result<Payment, PaymentError>;
    async fn find_payment_by_foreign_id(&self, foreign_id: &str)
    -> Result<Payment, PaymentError>;
    /// Record the gateway-issued id and move the payment to `Pending`.
    async fn set_payment_foreign(
        &self,
        id: Uuid,
        foreign_id: &str,
    ) -> Result<Payment, PaymentError>;
    /// Compare-and-set: persist `status` only while the current status is
    /// non-terminal. Returns whether the update happened, so duplicate
    /// webhook deliveries settle a payment exactly once.
    async fn transition_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<bool, PaymentError>;

    // ACCOUNTS & TIERS
    async fn get_account(&self, id: Uuid) -> Result<Account, PaymentError>;
    async fn upsert_account(&self, account: &Account) -> Result<(), PaymentError>;
    /// Tiers for a currency, ascending by cash threshold.
    async fn premium_tiers(&self, currency: Currency) -> Result<Vec<PremiumTier>, PaymentError>;
    async fn set_premium_tier(&self, owner: Uuid, tier_id: i32) -> Result<(), PaymentError>;
    async fn insert_premium_tier(&self, tier: &PremiumTier) -> Result<(), PaymentError>;
}

/// Shared contract of the two concrete ledgers.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Book this ledger writes to.
    fn book(&self) -> LedgerBook;

    /// Balance for (owner, currency), rounded to two decimals half-down.
    /// Returns 0 when no postings exist.
    async fn sum(&self, owner: Uuid, currency: Currency) -> Result<Decimal, PaymentError>;

    /// Validate and append a single posting. Sign mismatches are
    /// `BadParameter`; an outflow that would drive the balance negative is
    /// `InsufficientFunds` and leaves nothing recorded.
    async fn create(&self, request: PostingRequest) -> Result<Posting, PaymentError>;
}

/// Engine handle over a storage adapter.
pub struct PaymentEngine {
    adapter: Arc<dyn StorageAdapter>,
}

impl PaymentEngine {
    pub fn new(adapter: Box<dyn StorageAdapter>) -> Self {
        Self {
            adapter: adapter.into(),
        }
    }

    pub fn adapter(&self) -> &dyn StorageAdapter {
        self.adapter.as_ref()
    }

    /// Get adapter Arc (for building ledgers and the orchestrator)
    pub fn adapter_arc(&self) -> Arc<dyn StorageAdapter> {
        Arc::clone(&self.adapter)
    }
}
