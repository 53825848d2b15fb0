// src/wallet.rs
use crate::account::PremiumTier;
use crate::currency::{Currency, round_money};
use crate::error::PaymentError;
use crate::posting::{
    LedgerBook, Posting, PostingBatch, PostingEntry, PostingRequest, PostingType,
    WalletPostingType,
};
use crate::{LedgerStore, StorageAdapter};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Ordinary inflow/outflow ledger for an account's wallet.
///
/// Besides the shared ledger contract it owns the payments-only sum, the
/// balance-capping helper used by the amount split, and the premium tier
/// refresh that fires on qualifying inflows.
pub struct WalletLedger {
    adapter: Arc<dyn StorageAdapter>,
}

impl WalletLedger {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// Sum over the inflow tags that represent money actually paid in,
    /// as opposed to bonuses.
    pub async fn payments_sum(
        &self,
        owner: Uuid,
        currency: Currency,
    ) -> Result<Decimal, PaymentError> {
        let tags = WalletPostingType::PAYMENT_TYPES.map(PostingType::Wallet);
        let sum = self
            .adapter
            .sum_by_types(LedgerBook::Wallet, owner, currency, &tags)
            .await?;
        Ok(round_money(sum))
    }

    /// Cap requested balance usage at what is actually available. A
    /// shortfall is not an error; it is simply not covered by balance.
    pub async fn calculate_balance(
        &self,
        owner: Uuid,
        currency: Currency,
        amount: Decimal,
    ) -> Result<Decimal, PaymentError> {
        let balance = self.sum(owner, currency).await?;
        Ok(balance.min(amount))
    }

    /// Append a wallet posting that references another user (referral
    /// bonuses and their cancellations).
    pub async fn create_with_related(
        &self,
        request: PostingRequest,
        related_user: Uuid,
    ) -> Result<Posting, PaymentError> {
        self.create_inner(request, Some(related_user)).await
    }

    /// Recompute the owner's premium tier from cumulative wallet inflow.
    /// Monotonic: adopts the highest tier whose threshold and id both
    /// exceed the current tier's, never downgrades.
    pub async fn refresh_premium_tier(
        &self,
        owner: Uuid,
        currency: Currency,
    ) -> Result<(), PaymentError> {
        let account = self.adapter.get_account(owner).await?;
        let tiers = self.adapter.premium_tiers(currency).await?;

        let inflow_tags = WalletPostingType::INFLOW_TYPES.map(PostingType::Wallet);
        let lifetime_inflow = round_money(
            self.adapter
                .sum_by_types(LedgerBook::Wallet, owner, currency, &inflow_tags)
                .await?,
        );

        let (mut current_id, mut current_cash) = match account.premium_tier {
            Some(id) => tiers
                .iter()
                .find(|t| t.id == id)
                .map(|t| (t.id, t.cash))
                .unwrap_or((id, Decimal::ZERO)),
            None => (0, Decimal::ZERO),
        };

        let mut upgrade: Option<&PremiumTier> = None;
        for tier in &tiers {
            if tier.cash > current_cash && tier.id > current_id && lifetime_inflow >= tier.cash {
                current_id = tier.id;
                current_cash = tier.cash;
                upgrade = Some(tier);
            }
        }

        if let Some(tier) = upgrade {
            self.adapter.set_premium_tier(owner, tier.id).await?;
            info!(owner = %owner, tier = tier.id, currency = %currency, "premium tier upgraded");
        }

        Ok(())
    }

    async fn create_inner(
        &self,
        request: PostingRequest,
        related_user: Option<Uuid>,
    ) -> Result<Posting, PaymentError> {
        if request.entry.book() != LedgerBook::Wallet {
            return Err(PaymentError::BadParameter(
                "wallet ledger only accepts wallet posting tags".to_string(),
            ));
        }
        request.entry.validate_sign(request.amount)?;

        let owner = request.owner;
        let currency = request.currency;
        let mut batch = PostingBatch::new();
        batch.push(PostingEntry::from_request(request, related_user));

        let mut postings = self.adapter.execute_postings(&batch).await?;
        let posting = postings
            .pop()
            .ok_or_else(|| PaymentError::Storage("empty batch result".to_string()))?;

        if let PostingType::Wallet(tag) = posting.entry {
            if tag.qualifies_for_tier() {
                self.refresh_premium_tier(owner, currency).await?;
            }
        }

        Ok(posting)
    }
}

#[async_trait]
impl LedgerStore for WalletLedger {
    fn book(&self) -> LedgerBook {
        LedgerBook::Wallet
    }

    async fn sum(&self, owner: Uuid, currency: Currency) -> Result<Decimal, PaymentError> {
        let sum = self
            .adapter
            .sum(LedgerBook::Wallet, owner, currency)
            .await?;
        Ok(round_money(sum))
    }

    async fn create(&self, request: PostingRequest) -> Result<Posting, PaymentError> {
        self.create_inner(request, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, PremiumTier};
    use crate::adapters::MemoryAdapter;
    use rust_decimal_macros::dec;

    fn request(
        owner: Uuid,
        entry: WalletPostingType,
        amount: Decimal,
    ) -> PostingRequest {
        PostingRequest {
            owner,
            entry: PostingType::Wallet(entry),
            amount,
            currency: Currency::Usd,
            comment: String::new(),
            payment_id: None,
            order_ids: Vec::new(),
        }
    }

    async fn setup() -> (Arc<MemoryAdapter>, WalletLedger, Uuid) {
        let adapter = Arc::new(MemoryAdapter::new());
        let account = Account::new("alice", "en", Currency::Usd);
        adapter.upsert_account(&account).await.unwrap();
        let ledger = WalletLedger::new(adapter.clone() as Arc<dyn StorageAdapter>);
        (adapter, ledger, account.id)
    }

    #[tokio::test]
    async fn test_sum_is_zero_without_postings() {
        let (_, ledger, owner) = setup().await;
        assert_eq!(ledger.book(), LedgerBook::Wallet);
        assert_eq!(
            ledger.sum(owner, Currency::Usd).await.unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_create_and_sum() {
        let (_, ledger, owner) = setup().await;
        ledger
            .create(request(owner, WalletPostingType::InflowOther, dec!(10.50)))
            .await
            .unwrap();
        ledger
            .create(request(owner, WalletPostingType::OutflowOther, dec!(-4.25)))
            .await
            .unwrap();
        assert_eq!(ledger.sum(owner, Currency::Usd).await.unwrap(), dec!(6.25));
    }

    #[tokio::test]
    async fn test_outflow_overdraw_is_rejected_and_not_recorded() {
        let (_, ledger, owner) = setup().await;
        ledger
            .create(request(owner, WalletPostingType::InflowOther, dec!(5)))
            .await
            .unwrap();
        let err = ledger
            .create(request(owner, WalletPostingType::OutflowOther, dec!(-6)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientFunds));
        assert_eq!(ledger.sum(owner, Currency::Usd).await.unwrap(), dec!(5));
    }

    #[tokio::test]
    async fn test_sign_mismatch_is_bad_parameter() {
        let (_, ledger, owner) = setup().await;
        let err = ledger
            .create(request(owner, WalletPostingType::InflowPayment, dec!(-1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::BadParameter(_)));

        let err = ledger
            .create(request(owner, WalletPostingType::OutflowOrder, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::BadParameter(_)));
    }

    #[tokio::test]
    async fn test_rejects_cashback_tags() {
        let (_, ledger, owner) = setup().await;
        let err = ledger
            .create(PostingRequest {
                owner,
                entry: PostingType::Cashback(crate::posting::CashbackPostingType::InflowCreate),
                amount: dec!(1),
                currency: Currency::Usd,
                comment: String::new(),
                payment_id: None,
                order_ids: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::BadParameter(_)));
    }

    #[tokio::test]
    async fn test_payments_sum_ignores_bonus_inflows() {
        let (_, ledger, owner) = setup().await;
        ledger
            .create(request(owner, WalletPostingType::InflowPayment, dec!(40)))
            .await
            .unwrap();
        ledger
            .create(request(owner, WalletPostingType::InflowRefBonus, dec!(15)))
            .await
            .unwrap();
        assert_eq!(
            ledger.payments_sum(owner, Currency::Usd).await.unwrap(),
            dec!(40)
        );
        assert_eq!(ledger.sum(owner, Currency::Usd).await.unwrap(), dec!(55));
    }

    #[tokio::test]
    async fn test_calculate_balance_caps_at_available() {
        let (_, ledger, owner) = setup().await;
        ledger
            .create(request(owner, WalletPostingType::InflowOther, dec!(30)))
            .await
            .unwrap();
        assert_eq!(
            ledger
                .calculate_balance(owner, Currency::Usd, dec!(100))
                .await
                .unwrap(),
            dec!(30)
        );
        assert_eq!(
            ledger
                .calculate_balance(owner, Currency::Usd, dec!(12))
                .await
                .unwrap(),
            dec!(12)
        );
    }

    #[tokio::test]
    async fn test_create_with_related_records_related_user() {
        let (_, ledger, owner) = setup().await;
        let referrer = Uuid::now_v7();
        let posting = ledger
            .create_with_related(
                request(owner, WalletPostingType::InflowRefBonus, dec!(5)),
                referrer,
            )
            .await
            .unwrap();
        assert_eq!(posting.related_user, Some(referrer));
    }

    #[tokio::test]
    async fn test_qualifying_inflow_upgrades_tier() {
        let (adapter, ledger, owner) = setup().await;
        for (id, cash, title) in [(1, dec!(50), "silver"), (2, dec!(100), "gold")] {
            adapter
                .insert_premium_tier(&PremiumTier {
                    id,
                    currency: Currency::Usd,
                    cash,
                    title: title.to_string(),
                })
                .await
                .unwrap();
        }

        ledger
            .create(request(owner, WalletPostingType::InflowPayment, dec!(120)))
            .await
            .unwrap();

        let account = adapter.get_account(owner).await.unwrap();
        assert_eq!(account.premium_tier, Some(2));
    }

    #[tokio::test]
    async fn test_bonus_inflow_does_not_touch_tier() {
        let (adapter, ledger, owner) = setup().await;
        adapter
            .insert_premium_tier(&PremiumTier {
                id: 1,
                currency: Currency::Usd,
                cash: dec!(50),
                title: "silver".to_string(),
            })
            .await
            .unwrap();

        ledger
            .create(request(owner, WalletPostingType::InflowRefBonus, dec!(200)))
            .await
            .unwrap();

        let account = adapter.get_account(owner).await.unwrap();
        assert_eq!(account.premium_tier, None);
    }

    #[tokio::test]
    async fn test_tier_never_downgrades() {
        let (adapter, ledger, owner) = setup().await;
        for (id, cash, title) in [(1, dec!(50), "silver"), (2, dec!(100), "gold")] {
            adapter
                .insert_premium_tier(&PremiumTier {
                    id,
                    currency: Currency::Usd,
                    cash,
                    title: title.to_string(),
                })
                .await
                .unwrap();
        }

        ledger
            .create(request(owner, WalletPostingType::InflowPayment, dec!(150)))
            .await
            .unwrap();
        assert_eq!(
            adapter.get_account(owner).await.unwrap().premium_tier,
            Some(2)
        );

        // Spend most of it, then pay in a little more: inflow total only
        // grows, so the tier stays put.
        ledger
            .create(request(owner, WalletPostingType::OutflowOther, dec!(-140)))
            .await
            .unwrap();
        ledger
            .create(request(owner, WalletPostingType::InflowPayment, dec!(1)))
            .await
            .unwrap();
        assert_eq!(
            adapter.get_account(owner).await.unwrap().premium_tier,
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_tier_ignores_other_currencies() {
        let (adapter, ledger, owner) = setup().await;
        adapter
            .insert_premium_tier(&PremiumTier {
                id: 1,
                currency: Currency::Eur,
                cash: dec!(10),
                title: "bronze".to_string(),
            })
            .await
            .unwrap();

        ledger
            .create(request(owner, WalletPostingType::InflowPayment, dec!(100)))
            .await
            .unwrap();

        assert_eq!(adapter.get_account(owner).await.unwrap().premium_tier, None);
    }
}
