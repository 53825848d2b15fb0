// src/order.rs
use crate::account::Account;
use crate::error::PaymentError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// One fulfillable order, referenced by opaque id. Settlement calls
/// `pay()` and then `run()`, in that order.
#[async_trait]
pub trait Order: Send + Sync {
    fn id(&self) -> Uuid;
    async fn pay(&self) -> Result<(), PaymentError>;
    async fn run(&self) -> Result<(), PaymentError>;
}

/// Lookup for orders referenced by a payment. A missing id is an error,
/// never a skip.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Arc<dyn Order>, PaymentError>;
}

/// Price and nominal cashback for one order item, as quoted by the
/// external pricing collaborator.
#[derive(Debug, Clone, Copy)]
pub struct ServicePrice {
    pub price: Decimal,
    pub cashback: Decimal,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn prices_for_orders(
        &self,
        orders: &[Uuid],
        account: &Account,
    ) -> Result<Vec<ServicePrice>, PaymentError>;
}
