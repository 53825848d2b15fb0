// src/payment.rs
use crate::currency::Currency;
use crate::posting::PostingType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a payment.
///
/// `Created → Pending → {Succeeded, Failed, Canceled}`, with a direct
/// `Created → Succeeded` shortcut when nothing remains payable externally.
/// The braced three are terminal: once reached, the record never moves
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded | PaymentStatus::Failed | PaymentStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "created" => Some(PaymentStatus::Created),
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            "canceled" => Some(PaymentStatus::Canceled),
            _ => None,
        }
    }
}

/// One planned posting captured at payment creation: a tag and an amount.
///
/// The list is fixed when the payment is created and executed in full
/// exactly once, on the transition into `Succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPosting {
    pub entry: PostingType,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub owner: Uuid,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub actions: Vec<PlannedPosting>,
    pub order_ids: Vec<Uuid>,
    pub foreign_id: Option<String>,
    pub ip: String,
    pub geocode: Option<String>,
    pub gateway: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: Uuid,
        amount: Decimal,
        currency: Currency,
        gateway: &str,
        description: String,
        order_ids: Vec<Uuid>,
        actions: Vec<PlannedPosting>,
        ip: String,
        geocode: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner,
            amount,
            currency,
            status: PaymentStatus::Created,
            actions,
            order_ids,
            foreign_id: None,
            ip,
            geocode,
            gateway: gateway.to_string(),
            description,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_terminal_statuses() {
        assert!(!PaymentStatus::Created.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Succeeded.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_status_code_roundtrip() {
        for status in [
            PaymentStatus::Created,
            PaymentStatus::Pending,
            PaymentStatus::Succeeded,
            PaymentStatus::Failed,
            PaymentStatus::Canceled,
        ] {
            assert_eq!(PaymentStatus::from_code(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_code("refunded"), None);
    }

    #[test]
    fn test_new_payment_starts_created() {
        let payment = Payment::new(
            Uuid::now_v7(),
            dec!(25),
            Currency::Usd,
            "mockpay",
            "Payment 25 USD by mockpay".to_string(),
            Vec::new(),
            Vec::new(),
            "127.0.0.1".to_string(),
            None,
        );
        assert_eq!(payment.status, PaymentStatus::Created);
        assert!(payment.foreign_id.is_none());
    }
}
