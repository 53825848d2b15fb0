// src/adapters/postgres.rs
use crate::account::{Account, PremiumTier};
use crate::currency::{Currency, round_money};
use crate::error::PaymentError;
use crate::payment::{Payment, PaymentStatus, PlannedPosting};
use crate::posting::{FlowDirection, LedgerBook, Posting, PostingBatch, PostingType};
use crate::StorageAdapter;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

fn storage(e: sqlx::Error) -> PaymentError {
    PaymentError::Storage(e.to_string())
}

/// Postgres-backed adapter.
///
/// Balance scopes are serialized by `SELECT … FOR UPDATE` on the owner's
/// account row, so the sum-then-insert sequence inside `execute_postings`
/// cannot interleave with a concurrent batch for the same owner. The
/// status compare-and-set is a conditional UPDATE.
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, PaymentError> {
        let pool = PgPool::connect(url).await.map_err(storage)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema. Only call this for a standalone deployment that
    /// does not manage migrations elsewhere.
    pub async fn init_schema(&self) -> Result<(), PaymentError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pay_accounts (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                locale TEXT NOT NULL,
                currency TEXT NOT NULL,
                premium_tier INT
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pay_premium_tiers (
                id INT PRIMARY KEY,
                currency TEXT NOT NULL,
                cash NUMERIC(20, 2) NOT NULL,
                title TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pay_postings (
                id UUID PRIMARY KEY,
                book TEXT NOT NULL CHECK (book IN ('wallet', 'cashback')),
                owner UUID NOT NULL,
                type TEXT NOT NULL,
                amount NUMERIC(20, 6) NOT NULL,
                currency TEXT NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                payment_id UUID,
                order_ids UUID[] NOT NULL DEFAULT '{}',
                related_user UUID,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_pay_postings_scope
            ON pay_postings(book, owner, currency)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pay_payments (
                id UUID PRIMARY KEY,
                owner UUID NOT NULL,
                amount NUMERIC(20, 6) NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                actions JSONB NOT NULL,
                order_ids UUID[] NOT NULL DEFAULT '{}',
                foreign_id TEXT,
                ip TEXT NOT NULL DEFAULT '',
                geocode TEXT,
                gateway TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_pay_payments_foreign
            ON pay_payments(foreign_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn scope_sum_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        book: LedgerBook,
        owner: Uuid,
        currency: Currency,
    ) -> Result<Decimal, PaymentError> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0::numeric) FROM pay_postings \
             WHERE book = $1 AND owner = $2 AND currency = $3",
        )
        .bind(book.as_str())
        .bind(owner)
        .bind(currency.code())
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)
    }

    async fn insert_posting_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        posting: &Posting,
    ) -> Result<(), PaymentError> {
        sqlx::query(
            "INSERT INTO pay_postings \
             (id, book, owner, type, amount, currency, comment, payment_id, order_ids, related_user, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(posting.id)
        .bind(posting.book().as_str())
        .bind(posting.owner)
        .bind(posting.entry.as_str())
        .bind(posting.amount)
        .bind(posting.currency.code())
        .bind(&posting.comment)
        .bind(posting.payment_id)
        .bind(&posting.order_ids)
        .bind(posting.related_user)
        .bind(posting.created_at)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;
        Ok(())
    }

    fn payment_from_row(row: &PgRow) -> Result<Payment, PaymentError> {
        let currency: String = row.try_get("currency").map_err(storage)?;
        let status: String = row.try_get("status").map_err(storage)?;
        let actions: Json<Vec<PlannedPosting>> = row.try_get("actions").map_err(storage)?;

        Ok(Payment {
            id: row.try_get("id").map_err(storage)?,
            owner: row.try_get("owner").map_err(storage)?,
            amount: row.try_get("amount").map_err(storage)?,
            currency: Currency::from_code(&currency)?,
            status: PaymentStatus::from_code(&status)
                .ok_or_else(|| PaymentError::Storage(format!("unknown status: {status}")))?,
            actions: actions.0,
            order_ids: row.try_get("order_ids").map_err(storage)?,
            foreign_id: row.try_get("foreign_id").map_err(storage)?,
            ip: row.try_get("ip").map_err(storage)?,
            geocode: row.try_get("geocode").map_err(storage)?,
            gateway: row.try_get("gateway").map_err(storage)?,
            description: row.try_get("description").map_err(storage)?,
            created_at: row.try_get("created_at").map_err(storage)?,
            updated_at: row.try_get("updated_at").map_err(storage)?,
        })
    }

    fn account_from_row(row: &PgRow) -> Result<Account, PaymentError> {
        let currency: String = row.try_get("currency").map_err(storage)?;
        Ok(Account {
            id: row.try_get("id").map_err(storage)?,
            name: row.try_get("name").map_err(storage)?,
            locale: row.try_get("locale").map_err(storage)?,
            currency: Currency::from_code(&currency)?,
            premium_tier: row.try_get("premium_tier").map_err(storage)?,
        })
    }
}

#[async_trait]
impl StorageAdapter for PostgresAdapter {
    async fn execute_postings(
        &self,
        batch: &PostingBatch,
    ) -> Result<Vec<Posting>, PaymentError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // Lock owners in sorted order so concurrent batches over the same
        // accounts cannot deadlock. An early return drops the transaction
        // and rolls everything back.
        for owner in batch.lock_owners() {
            sqlx::query("SELECT id FROM pay_accounts WHERE id = $1 FOR UPDATE")
                .bind(owner)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;
        }

        let mut created = Vec::with_capacity(batch.entries().len());
        for entry in batch.entries() {
            if entry.entry.direction() == FlowDirection::Outflow {
                let sum =
                    Self::scope_sum_tx(&mut tx, entry.entry.book(), entry.owner, entry.currency)
                        .await?;
                if round_money(sum) - entry.amount.abs() < Decimal::ZERO {
                    return Err(PaymentError::InsufficientFunds);
                }
            }

            let posting = Posting::from_entry(entry);
            Self::insert_posting_tx(&mut tx, &posting).await?;
            created.push(posting);
        }

        tx.commit().await.map_err(storage)?;
        Ok(created)
    }

    async fn sum(
        &self,
        book: LedgerBook,
        owner: Uuid,
        currency: Currency,
    ) -> Result<Decimal, PaymentError> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0::numeric) FROM pay_postings \
             WHERE book = $1 AND owner = $2 AND currency = $3",
        )
        .bind(book.as_str())
        .bind(owner)
        .bind(currency.code())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)
    }

    async fn sum_by_types(
        &self,
        book: LedgerBook,
        owner: Uuid,
        currency: Currency,
        tags: &[PostingType],
    ) -> Result<Decimal, PaymentError> {
        let tag_names: Vec<String> = tags.iter().map(|t| t.as_str().to_string()).collect();
        sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0::numeric) FROM pay_postings \
             WHERE book = $1 AND owner = $2 AND currency = $3 AND type = ANY($4)",
        )
        .bind(book.as_str())
        .bind(owner)
        .bind(currency.code())
        .bind(&tag_names)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), PaymentError> {
        sqlx::query(
            "INSERT INTO pay_payments \
             (id, owner, amount, currency, status, actions, order_ids, foreign_id, ip, geocode, gateway, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(payment.id)
        .bind(payment.owner)
        .bind(payment.amount)
        .bind(payment.currency.code())
        .bind(payment.status.as_str())
        .bind(Json(payment.actions.clone()))
        .bind(&payment.order_ids)
        .bind(&payment.foreign_id)
        .bind(&payment.ip)
        .bind(&payment.geocode)
        .bind(&payment.gateway)
        .bind(&payment.description)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, PaymentError> {
        let row = sqlx::query("SELECT * FROM pay_payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| PaymentError::not_found("payment", id))?;
        Self::payment_from_row(&row)
    }

    async fn find_payment_by_foreign_id(
        &self,
        foreign_id: &str,
    ) -> Result<Payment, PaymentError> {
        let row = sqlx::query("SELECT * FROM pay_payments WHERE foreign_id = $1")
            .bind(foreign_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| PaymentError::not_found("payment", foreign_id))?;
        Self::payment_from_row(&row)
    }

    async fn set_payment_foreign(
        &self,
        id: Uuid,
        foreign_id: &str,
    ) -> Result<Payment, PaymentError> {
        let result = sqlx::query(
            "UPDATE pay_payments SET foreign_id = $2, status = 'pending', updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(foreign_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(PaymentError::not_found("payment", id));
        }
        self.get_payment(id).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<bool, PaymentError> {
        let result = sqlx::query(
            "UPDATE pay_payments SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'canceled')",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "already terminal" from "no such payment".
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM pay_payments WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        if exists == 0 {
            return Err(PaymentError::not_found("payment", id));
        }
        Ok(false)
    }

    async fn get_account(&self, id: Uuid) -> Result<Account, PaymentError> {
        let row = sqlx::query("SELECT * FROM pay_accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| PaymentError::not_found("account", id))?;
        Self::account_from_row(&row)
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), PaymentError> {
        sqlx::query(
            "INSERT INTO pay_accounts (id, name, locale, currency, premium_tier) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
             name = EXCLUDED.name, locale = EXCLUDED.locale, \
             currency = EXCLUDED.currency, premium_tier = EXCLUDED.premium_tier",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.locale)
        .bind(account.currency.code())
        .bind(account.premium_tier)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn premium_tiers(&self, currency: Currency) -> Result<Vec<PremiumTier>, PaymentError> {
        let rows = sqlx::query(
            "SELECT * FROM pay_premium_tiers WHERE currency = $1 ORDER BY cash ASC",
        )
        .bind(currency.code())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                let code: String = row.try_get("currency").map_err(storage)?;
                Ok(PremiumTier {
                    id: row.try_get("id").map_err(storage)?,
                    currency: Currency::from_code(&code)?,
                    cash: row.try_get("cash").map_err(storage)?,
                    title: row.try_get("title").map_err(storage)?,
                })
            })
            .collect()
    }

    async fn set_premium_tier(&self, owner: Uuid, tier_id: i32) -> Result<(), PaymentError> {
        let result = sqlx::query("UPDATE pay_accounts SET premium_tier = $2 WHERE id = $1")
            .bind(owner)
            .bind(tier_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(PaymentError::not_found("account", owner));
        }
        Ok(())
    }

    async fn insert_premium_tier(&self, tier: &PremiumTier) -> Result<(), PaymentError> {
        sqlx::query(
            "INSERT INTO pay_premium_tiers (id, currency, cash, title) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET \
             currency = EXCLUDED.currency, cash = EXCLUDED.cash, title = EXCLUDED.title",
        )
        .bind(tier.id)
        .bind(tier.currency.code())
        .bind(tier.cash)
        .bind(&tier.title)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}
