//! Database service for subscription-service.

use super::store::{SubscriptionStore, WriteOutcome};
use crate::models::{SubscriptionRecord, SubscriptionRow, TrialGrant};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "id, account_id, plan_type, amount, status, provider, \
     provider_subscription_id, current_period_start, current_period_end, pending_plan_type, \
     pending_plan_change_at, cancel_at_period_end, cancelled_at, refund_processed_at, \
     created_at, updated_at";

const TRIAL_COLUMNS: &str = "account_id, trial_ends_at, free_months, created_at, updated_at";

/// Postgres-backed subscription store.
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

fn into_records(rows: Vec<SubscriptionRow>) -> Result<Vec<SubscriptionRecord>, AppError> {
    rows.into_iter().map(SubscriptionRecord::try_from).collect()
}

impl PgSubscriptionStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| db_error("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_optional(
        &self,
        operation: &'static str,
        where_clause: &str,
        key: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM subscriptions WHERE {} ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS, where_clause
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&format!("Failed to {}", operation), e))?;

        timer.observe_duration();

        row.map(SubscriptionRecord::try_from).transpose()
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    #[instrument(skip(self), fields(subscription_id = %id))]
    async fn get(&self, id: Uuid) -> Result<Option<SubscriptionRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get subscription", e))?;

        timer.observe_duration();

        row.map(SubscriptionRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        self.fetch_optional(
            "find_by_provider_subscription_id",
            "provider_subscription_id = $1",
            provider_subscription_id,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn latest_for_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        self.fetch_optional("latest_for_account", "account_id = $1", account_id)
            .await
    }

    #[instrument(skip(self))]
    async fn latest_pending_for_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        self.fetch_optional(
            "latest_pending_for_account",
            "account_id = $1 AND status = 'pending'",
            account_id,
        )
        .await
    }

    #[instrument(
        skip(self, record),
        fields(subscription_id = %record.id, account_id = %record.account_id)
    )]
    async fn insert(&self, record: &SubscriptionRecord) -> Result<WriteOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (id, account_id, plan_type, amount, status, provider, provider_subscription_id, current_period_start, current_period_end, pending_plan_type, pending_plan_change_at, cancel_at_period_end, cancelled_at, refund_processed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id)
        .bind(&record.account_id)
        .bind(record.plan_type.as_str())
        .bind(record.amount)
        .bind(record.status.as_str())
        .bind(record.provider.map(|p| p.as_str()))
        .bind(&record.provider_subscription_id)
        .bind(record.current_period_start)
        .bind(record.current_period_end)
        .bind(record.pending_change.map(|c| c.plan_type.as_str()))
        .bind(record.pending_change.map(|c| c.effective_at))
        .bind(record.cancel_at_period_end)
        .bind(record.cancelled_at)
        .bind(record.refund_processed_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(_) => Ok(WriteOutcome::Written),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                // Race condition: another delivery created the record
                Ok(WriteOutcome::Conflict)
            }
            Err(e) => Err(db_error("Failed to insert subscription", e)),
        }
    }

    #[instrument(skip(self, record), fields(subscription_id = %record.id))]
    async fn compare_and_set(
        &self,
        record: &SubscriptionRecord,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["compare_and_set_subscription"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_type = $3, amount = $4, status = $5, provider = $6, provider_subscription_id = $7,
                current_period_start = $8, current_period_end = $9, pending_plan_type = $10,
                pending_plan_change_at = $11, cancel_at_period_end = $12, cancelled_at = $13,
                refund_processed_at = $14, updated_at = $15
            WHERE id = $1 AND updated_at = $2
            "#,
        )
        .bind(record.id)
        .bind(expected_updated_at)
        .bind(record.plan_type.as_str())
        .bind(record.amount)
        .bind(record.status.as_str())
        .bind(record.provider.map(|p| p.as_str()))
        .bind(&record.provider_subscription_id)
        .bind(record.current_period_start)
        .bind(record.current_period_end)
        .bind(record.pending_change.map(|c| c.plan_type.as_str()))
        .bind(record.pending_change.map(|c| c.effective_at))
        .bind(record.cancel_at_period_end)
        .bind(record.cancelled_at)
        .bind(record.refund_processed_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(WriteOutcome::Written),
            Ok(_) => Ok(WriteOutcome::Conflict),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Ok(WriteOutcome::Conflict)
            }
            Err(e) => Err(db_error("Failed to update subscription", e)),
        }
    }

    #[instrument(skip(self))]
    async fn list_lapsed(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_lapsed"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM subscriptions WHERE status = 'active' AND current_period_end < $1 \
             ORDER BY current_period_end LIMIT 500",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list lapsed subscriptions", e))?;

        timer.observe_duration();

        into_records(rows)
    }

    #[instrument(skip(self))]
    async fn get_trial(&self, account_id: &str) -> Result<Option<TrialGrant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_trial"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM trial_grants WHERE account_id = $1",
            TRIAL_COLUMNS
        );
        let grant = sqlx::query_as::<_, TrialGrant>(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get trial", e))?;

        timer.observe_duration();

        Ok(grant)
    }

    #[instrument(skip(self, grant), fields(account_id = %grant.account_id))]
    async fn insert_trial(&self, grant: &TrialGrant) -> Result<TrialGrant, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_trial"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO trial_grants (account_id, trial_ends_at, free_months, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(&grant.account_id)
        .bind(grant.trial_ends_at)
        .bind(grant.free_months)
        .bind(grant.created_at)
        .bind(grant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert trial", e))?;

        timer.observe_duration();

        self.get_trial(&grant.account_id).await?.ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Trial for account {} vanished after insert",
                grant.account_id
            ))
        })
    }

    #[instrument(skip(self))]
    async fn add_free_months(
        &self,
        account_id: &str,
        months: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<TrialGrant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_free_months"])
            .start_timer();

        let sql = format!(
            "UPDATE trial_grants SET free_months = free_months + $2, updated_at = $3 \
             WHERE account_id = $1 RETURNING {}",
            TRIAL_COLUMNS
        );
        let grant = sqlx::query_as::<_, TrialGrant>(&sql)
            .bind(account_id)
            .bind(months)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to add free months", e))?;

        timer.observe_duration();

        Ok(grant)
    }

    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}
