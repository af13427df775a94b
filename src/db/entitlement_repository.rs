use async_trait::async_trait;
use uuid::Uuid;

use crate::models::entitlement::{Entitlement, EntitlementUpsert};

#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Entitlement>, sqlx::Error>;

    async fn find_user_id_by_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error>;

    /// Inserts or overwrites the user's row. Returns `false` when the stored
    /// row carries a newer `source_version` and the write was skipped.
    async fn upsert(&self, entitlement: &EntitlementUpsert) -> Result<bool, sqlx::Error>;
}
