// src/orchestrator.rs
use crate::account::Account;
use crate::cashback::CashbackLedger;
use crate::currency::round_money;
use crate::error::PaymentError;
use crate::gateway::{ChargeData, GeoResolver, HookRequest, HookResponse, PaymentGateway};
use crate::gateway::{RemotePayment, RemotePaymentRequest};
use crate::order::{OrderStore, PriceSource, ServicePrice};
use crate::payment::{Payment, PaymentStatus, PlannedPosting};
use crate::posting::{
    CashbackPostingType, PostingBatch, PostingEntry, PostingType, WalletPostingType,
};
use crate::wallet::WalletLedger;
use crate::StorageAdapter;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Split of a gross charge across wallet balance, cashback credit and the
/// externally payable remainder. All three are non-negative and add back
/// up to the gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountSplit {
    pub payable: Decimal,
    pub balance: Decimal,
    pub cashback: Decimal,
}

/// Outcome of payment creation: where to send the payer, and the record.
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub url: String,
    pub payment: Payment,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Verbose create-payment logging.
    pub debug_payments: bool,
    /// Audit-description truncation length.
    pub description_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debug_payments: false,
            description_limit: 190,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            debug_payments: std::env::var("PAYBOOK_DEBUG_PAYMENTS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            ..Self::default()
        }
    }
}

/// Drives a payment from creation through the gateway to settlement:
/// computes the balance/cashback/external split, captures the planned
/// postings, runs the status machine, executes postings atomically and
/// fulfills orders.
pub struct PaymentOrchestrator {
    adapter: Arc<dyn StorageAdapter>,
    wallet: WalletLedger,
    cashback: CashbackLedger,
    orders: Arc<dyn OrderStore>,
    prices: Arc<dyn PriceSource>,
    geo: Option<Arc<dyn GeoResolver>>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        adapter: Arc<dyn StorageAdapter>,
        orders: Arc<dyn OrderStore>,
        prices: Arc<dyn PriceSource>,
    ) -> Self {
        Self {
            wallet: WalletLedger::new(Arc::clone(&adapter)),
            cashback: CashbackLedger::new(Arc::clone(&adapter)),
            adapter,
            orders,
            prices,
            geo: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_geo_resolver(mut self, geo: Arc<dyn GeoResolver>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn wallet(&self) -> &WalletLedger {
        &self.wallet
    }

    pub fn cashback(&self) -> &CashbackLedger {
        &self.cashback
    }

    /// Create a payment for `owner` over `gateway`.
    ///
    /// When orders are supplied, the gross amount is recomputed from the
    /// pricing collaborator and overrides the caller's figure. A charge
    /// fully covered by balance and cashback settles immediately and never
    /// touches the gateway; otherwise the remainder is created remotely and
    /// the payment parks in `Pending` under the gateway-issued id.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        gateway: &dyn PaymentGateway,
        owner: Uuid,
        amount: Decimal,
        data: ChargeData,
        orders: &[Uuid],
        use_balance: bool,
        use_cashback: bool,
        ip: &str,
    ) -> Result<CreatedPayment, PaymentError> {
        let account = self.adapter.get_account(owner).await?;
        if !gateway.has_currency(account.currency) {
            return Err(PaymentError::BadCurrency(account.currency.code().to_string()));
        }

        let mut gross = amount;
        let prices = if orders.is_empty() {
            Vec::new()
        } else {
            let prices = self.prices.prices_for_orders(orders, &account).await?;
            gross = prices.iter().map(|p| p.price).sum();
            prices
        };

        let split = self
            .calculate_split(&account, gross, use_balance, use_cashback)
            .await?;
        let actions = build_actions(gross, &split, &prices, orders);

        let geocode = self.geo.as_ref().and_then(|g| g.country(ip));
        let description = truncate_to_boundary(
            format!("Payment {gross} {} by {}", account.currency, gateway.name()),
            self.config.description_limit,
        );
        let payment = Payment::new(
            owner,
            gross,
            account.currency,
            gateway.name(),
            description,
            orders.to_vec(),
            actions,
            ip.to_string(),
            geocode,
        );
        self.adapter.insert_payment(&payment).await?;

        if self.config.debug_payments {
            debug!(
                payment = %payment.id,
                amount = %gross,
                payable = %split.payable,
                balance = %split.balance,
                cashback = %split.cashback,
                "create payment"
            );
        }

        if split.payable > Decimal::ZERO {
            let remote = self
                .create_remote_payment(gateway, &payment, &account, split.payable, &data)
                .await?;
            let payment = self
                .adapter
                .set_payment_foreign(payment.id, &remote.id)
                .await?;
            Ok(CreatedPayment {
                url: remote.url,
                payment,
            })
        } else {
            self.update_status(payment.id, PaymentStatus::Succeeded)
                .await?;
            let payment = self.adapter.get_payment(payment.id).await?;
            Ok(CreatedPayment {
                url: data.success_url,
                payment,
            })
        }
    }

    async fn create_remote_payment(
        &self,
        gateway: &dyn PaymentGateway,
        payment: &Payment,
        account: &Account,
        payable: Decimal,
        data: &ChargeData,
    ) -> Result<RemotePayment, PaymentError> {
        let request = RemotePaymentRequest {
            amount: payable,
            currency: account.currency,
            user_name: account.name.clone(),
            locale: account.locale.clone(),
            success_url: data.success_url.clone(),
            data: data.extra.clone(),
        };
        match gateway.create_remote_payment(payment, request).await {
            Ok(remote) => Ok(remote),
            Err(e) => {
                if self.config.debug_payments {
                    debug!(payment = %payment.id, error = %e, "create remote payment failed");
                }
                Err(e)
            }
        }
    }

    /// Blend wallet balance, cashback credit and external money for a
    /// charge. Both deductions are individually capped by the remaining
    /// need, so no component goes negative.
    pub async fn calculate_split(
        &self,
        account: &Account,
        amount: Decimal,
        use_balance: bool,
        use_cashback: bool,
    ) -> Result<AmountSplit, PaymentError> {
        let balance = if use_balance {
            self.wallet
                .calculate_balance(account.id, account.currency, amount)
                .await?
        } else {
            Decimal::ZERO
        };

        let cashback = if use_cashback {
            self.cashback
                .calculate_cashback(account.id, account.currency, amount, balance)
                .await?
        } else {
            Decimal::ZERO
        };

        Ok(AmountSplit {
            payable: amount - balance - cashback,
            balance,
            cashback,
        })
    }

    /// Drive the status machine. Returns `false` when the payment is
    /// already terminal, the defined no-op for duplicate or late webhook
    /// deliveries. A successful transition into `Succeeded` executes the
    /// planned postings and then fulfills the orders.
    pub async fn update_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<bool, PaymentError> {
        if !self.adapter.transition_status(payment_id, status).await? {
            return Ok(false);
        }
        counter!("payments.status.transitions", "status" => status.as_str()).increment(1);

        if status == PaymentStatus::Succeeded {
            let payment = self.adapter.get_payment(payment_id).await?;
            self.run_actions(&payment).await?;
            self.run_orders(&payment).await?;
        }

        Ok(true)
    }

    /// Execute the payment's planned postings as one atomic batch.
    async fn run_actions(&self, payment: &Payment) -> Result<(), PaymentError> {
        if payment.actions.is_empty() {
            return Ok(());
        }

        let mut batch = PostingBatch::new();
        for planned in &payment.actions {
            planned.entry.validate_sign(planned.amount)?;
            histogram!(
                "payments.posting.amount",
                "book" => planned.entry.book().as_str()
            )
            .record(planned.amount.abs().to_f64().unwrap_or(0.0));
            batch.push(PostingEntry {
                owner: payment.owner,
                entry: planned.entry,
                amount: planned.amount,
                currency: payment.currency,
                comment: String::new(),
                payment_id: Some(payment.id),
                order_ids: payment.order_ids.clone(),
                related_user: None,
            });
        }

        let result = self.adapter.execute_postings(&batch).await;
        counter!(
            "payments.posting.batches",
            "status" => if result.is_ok() { "success" } else { "failed" }
        )
        .increment(1);
        let postings = result?;

        for posting in &postings {
            if let PostingType::Wallet(tag) = posting.entry {
                if tag.qualifies_for_tier() {
                    self.wallet
                        .refresh_premium_tier(payment.owner, payment.currency)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Fulfill each referenced order, fail-fast. Runs after the posting
    /// batch has committed; a failure here surfaces as one reportable
    /// error and never rolls the ledger back.
    async fn run_orders(&self, payment: &Payment) -> Result<(), PaymentError> {
        for order_id in &payment.order_ids {
            let order = self.orders.find(*order_id).await?;
            if let Err(e) = order.pay().await {
                return Err(PaymentError::reportable("could not run order", e));
            }
            info!(order = %order_id, payment = %payment.id, "order paid");
            if let Err(e) = order.run().await {
                return Err(PaymentError::reportable("could not run order", e));
            }
            info!(order = %order_id, payment = %payment.id, "order run");
        }
        Ok(())
    }

    /// Process an inbound gateway webhook. Whatever happens internally,
    /// the gateway receives its default acknowledgement unless signature
    /// verification or payload mapping itself failed; every failure wraps
    /// into a single reportable error with the cause attached.
    pub async fn handle_hook(
        &self,
        gateway: &dyn PaymentGateway,
        request: &HookRequest,
    ) -> Result<HookResponse, PaymentError> {
        self.handle_hook_inner(gateway, request)
            .await
            .map_err(|e| PaymentError::reportable("payment hook error", e))
    }

    async fn handle_hook_inner(
        &self,
        gateway: &dyn PaymentGateway,
        request: &HookRequest,
    ) -> Result<HookResponse, PaymentError> {
        gateway.check_signature(request).await?;
        let status = gateway.map_request_to_status(request)?;

        if let Some(foreign_id) = gateway.foreign_payment_id(request) {
            let payment = self.adapter.find_payment_by_foreign_id(&foreign_id).await?;

            if !self.update_status(payment.id, status).await? {
                warn!(
                    payment = %payment.id,
                    status = status.as_str(),
                    payload = %request.body,
                    "missed status for settled payment"
                );
                return Ok(gateway.default_response());
            }

            info!(payment = %payment.id, status = status.as_str(), "payment status updated");
        }

        Ok(gateway.default_response())
    }
}

/// Planned postings for a charge, in audit order: money in, order charge,
/// cashback spend, cashback earned.
fn build_actions(
    amount: Decimal,
    split: &AmountSplit,
    prices: &[ServicePrice],
    orders: &[Uuid],
) -> Vec<PlannedPosting> {
    let mut actions = Vec::new();

    if split.payable > Decimal::ZERO {
        actions.push(PlannedPosting {
            entry: PostingType::Wallet(WalletPostingType::InflowPayment),
            amount: split.payable,
        });
    }

    if !orders.is_empty() && (split.payable > Decimal::ZERO || split.balance > Decimal::ZERO) {
        actions.push(PlannedPosting {
            entry: PostingType::Wallet(WalletPostingType::OutflowOrder),
            amount: -(split.payable + split.balance),
        });
    }

    if split.cashback > Decimal::ZERO {
        actions.push(PlannedPosting {
            entry: PostingType::Cashback(CashbackPostingType::OutflowOrder),
            amount: -split.cashback,
        });
    }

    // A free order earns nothing; the guard also keeps the proportional
    // scale-down away from dividing by zero.
    if !prices.is_empty() && amount > Decimal::ZERO {
        let nominal: Decimal = prices.iter().map(|p| p.cashback).sum();
        let earned = round_money(nominal * (split.payable + split.balance) / amount);
        if earned > Decimal::ZERO {
            actions.push(PlannedPosting {
                entry: PostingType::Cashback(CashbackPostingType::InflowPayment),
                amount: earned,
            });
        }
    }

    actions
}

fn truncate_to_boundary(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn split(payable: Decimal, balance: Decimal, cashback: Decimal) -> AmountSplit {
        AmountSplit {
            payable,
            balance,
            cashback,
        }
    }

    fn prices(items: &[(Decimal, Decimal)]) -> Vec<ServicePrice> {
        items
            .iter()
            .map(|(price, cashback)| ServicePrice {
                price: *price,
                cashback: *cashback,
            })
            .collect()
    }

    #[test]
    fn test_actions_external_only() {
        let actions = build_actions(dec!(50), &split(dec!(50), dec!(0), dec!(0)), &[], &[]);
        assert_eq!(actions.len(), 1);
        assert_eq!(
            actions[0],
            PlannedPosting {
                entry: PostingType::Wallet(WalletPostingType::InflowPayment),
                amount: dec!(50),
            }
        );
    }

    #[test]
    fn test_actions_balance_covered_order() {
        let order = Uuid::now_v7();
        let actions = build_actions(
            dec!(40),
            &split(dec!(0), dec!(40), dec!(0)),
            &prices(&[(dec!(40), dec!(0))]),
            &[order],
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(
            actions[0],
            PlannedPosting {
                entry: PostingType::Wallet(WalletPostingType::OutflowOrder),
                amount: dec!(-40),
            }
        );
    }

    #[test]
    fn test_actions_blended_order() {
        let order = Uuid::now_v7();
        let actions = build_actions(
            dec!(100),
            &split(dec!(60), dec!(30), dec!(10)),
            &prices(&[(dec!(100), dec!(8))]),
            &[order],
        );
        assert_eq!(actions.len(), 4);
        assert_eq!(
            actions[0].entry,
            PostingType::Wallet(WalletPostingType::InflowPayment)
        );
        assert_eq!(actions[0].amount, dec!(60));
        assert_eq!(
            actions[1].entry,
            PostingType::Wallet(WalletPostingType::OutflowOrder)
        );
        assert_eq!(actions[1].amount, dec!(-90));
        assert_eq!(
            actions[2].entry,
            PostingType::Cashback(CashbackPostingType::OutflowOrder)
        );
        assert_eq!(actions[2].amount, dec!(-10));
        // Nominal 8 scales by the money-covered share 90/100.
        assert_eq!(
            actions[3].entry,
            PostingType::Cashback(CashbackPostingType::InflowPayment)
        );
        assert_eq!(actions[3].amount, dec!(7.20));
    }

    #[test]
    fn test_actions_cashback_only_covered_order() {
        let order = Uuid::now_v7();
        // Fully covered by cashback: no wallet postings at all, and the
        // money-covered share is zero, so nothing is earned either.
        let actions = build_actions(
            dec!(10),
            &split(dec!(0), dec!(0), dec!(10)),
            &prices(&[(dec!(10), dec!(2))]),
            &[order],
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(
            actions[0].entry,
            PostingType::Cashback(CashbackPostingType::OutflowOrder)
        );
    }

    #[test]
    fn test_actions_zero_amount_earns_nothing() {
        let order = Uuid::now_v7();
        let actions = build_actions(
            Decimal::ZERO,
            &split(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            &prices(&[(dec!(0), dec!(5))]),
            &[order],
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert!(!config.debug_payments);
        assert_eq!(config.description_limit, 190);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "Payment 10 RUB by кошелёк".to_string();
        let truncated = truncate_to_boundary(text.clone(), 20);
        assert!(truncated.len() <= 20);
        assert!(text.starts_with(&truncated));
        assert_eq!(truncate_to_boundary("short".to_string(), 190), "short");
    }
}
