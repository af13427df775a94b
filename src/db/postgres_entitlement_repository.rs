use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::entitlement_repository::EntitlementRepository;
use crate::models::entitlement::{Entitlement, EntitlementUpsert};
use crate::models::plan::PlanTier;

pub struct PostgresEntitlementRepository {
    pub pool: PgPool,
}

#[derive(FromRow)]
struct EntitlementRow {
    user_id: Uuid,
    plan_tier: String,
    plan_name: Option<String>,
    status: String,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    stripe_product_id: Option<String>,
    current_period_end: Option<OffsetDateTime>,
    source_version: i64,
    updated_at: OffsetDateTime,
}

impl TryFrom<EntitlementRow> for Entitlement {
    type Error = sqlx::Error;

    fn try_from(row: EntitlementRow) -> Result<Self, Self::Error> {
        let plan_tier = row
            .plan_tier
            .parse::<PlanTier>()
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

        Ok(Entitlement {
            user_id: row.user_id,
            plan_tier,
            plan_name: row.plan_name,
            status: row.status,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            stripe_product_id: row.stripe_product_id,
            current_period_end: row.current_period_end,
            source_version: row.source_version,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl EntitlementRepository for PostgresEntitlementRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Entitlement>, sqlx::Error> {
        let row = sqlx::query_as::<_, EntitlementRow>(
            r#"
            SELECT user_id,
                   plan_tier,
                   plan_name,
                   status,
                   stripe_customer_id,
                   stripe_subscription_id,
                   stripe_product_id,
                   current_period_end,
                   source_version,
                   updated_at
            FROM entitlements
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Entitlement::try_from).transpose()
    }

    async fn find_user_id_by_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id
            FROM entitlements
            WHERE stripe_customer_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(stripe_customer_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn upsert(&self, entitlement: &EntitlementUpsert) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO entitlements (
                user_id,
                plan_tier,
                plan_name,
                status,
                stripe_customer_id,
                stripe_subscription_id,
                stripe_product_id,
                current_period_end,
                source_version,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            ON CONFLICT (user_id) DO UPDATE
            SET plan_tier = EXCLUDED.plan_tier,
                plan_name = EXCLUDED.plan_name,
                status = EXCLUDED.status,
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, entitlements.stripe_customer_id),
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_product_id = EXCLUDED.stripe_product_id,
                current_period_end = EXCLUDED.current_period_end,
                source_version = EXCLUDED.source_version,
                updated_at = now()
            WHERE entitlements.source_version <= EXCLUDED.source_version
            "#,
        )
        .bind(entitlement.user_id)
        .bind(entitlement.plan_tier.as_str())
        .bind(entitlement.plan_name.as_deref())
        .bind(&entitlement.status)
        .bind(entitlement.stripe_customer_id.as_deref())
        .bind(entitlement.stripe_subscription_id.as_deref())
        .bind(entitlement.stripe_product_id.as_deref())
        .bind(entitlement.current_period_end)
        .bind(entitlement.source_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
