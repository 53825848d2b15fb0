// src/gateway.rs
use crate::currency::Currency;
use crate::error::PaymentError;
use crate::payment::{Payment, PaymentStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;

/// Inbound webhook carrier, free of any HTTP framework.
#[derive(Debug, Clone, Default)]
pub struct HookRequest {
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl HookRequest {
    pub fn new(body: Value) -> Self {
        Self {
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Acknowledgement handed back to the gateway after a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResponse {
    pub status: u16,
    pub body: String,
}

impl HookResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// What the caller supplies for a new charge: where to land the user on
/// success, plus opaque data forwarded to the gateway untouched.
#[derive(Debug, Clone)]
pub struct ChargeData {
    pub success_url: String,
    pub extra: Value,
}

impl ChargeData {
    pub fn new(success_url: impl Into<String>) -> Self {
        Self {
            success_url: success_url.into(),
            extra: Value::Null,
        }
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

/// Request assembled for remote payment creation: the externally payable
/// remainder, the payer's display data, and the caller's redirect target.
#[derive(Debug, Clone)]
pub struct RemotePaymentRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub user_name: String,
    pub locale: String,
    pub success_url: String,
    pub data: Value,
}

/// Remote payment handle issued by a gateway.
#[derive(Debug, Clone)]
pub struct RemotePayment {
    pub id: String,
    pub url: String,
}

/// Contract a concrete payment gateway adapter fulfills. Provider-specific
/// signature formats, field names and response bodies all live behind it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Stable identifier recorded on payments for audit.
    fn name(&self) -> &str;

    fn has_currency(&self, currency: Currency) -> bool;

    /// Create the remote payment and return its id and redirect URL.
    /// Failures propagate to the caller unchanged; the core does not retry.
    async fn create_remote_payment(
        &self,
        payment: &Payment,
        request: RemotePaymentRequest,
    ) -> Result<RemotePayment, PaymentError>;

    /// Verify the webhook's authenticity. May call out to the provider.
    async fn check_signature(&self, request: &HookRequest) -> Result<(), PaymentError>;

    /// Map the provider payload to an internal status.
    fn map_request_to_status(&self, request: &HookRequest)
    -> Result<PaymentStatus, PaymentError>;

    /// Extract the gateway-assigned payment id, when the payload has one.
    fn foreign_payment_id(&self, request: &HookRequest) -> Option<String>;

    /// The acknowledgement this provider expects for a processed webhook.
    fn default_response(&self) -> HookResponse;
}

/// Optional ip → country resolution feeding a payment's geocode.
pub trait GeoResolver: Send + Sync {
    fn country(&self, ip: &str) -> Option<String>;
}
