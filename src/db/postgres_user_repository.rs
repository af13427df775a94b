use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::user_repository::UserRepository;
use crate::models::user::Profile;

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn list_profiles_with_email(&self) -> Result<Vec<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            r#"
            SELECT id, email
            FROM profiles
            WHERE email IS NOT NULL AND email <> ''
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            r#"
            SELECT id, email
            FROM profiles
            WHERE lower(email) = lower($1)
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_profile_by_id(&self, user_id: Uuid) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>("SELECT id, email FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }
}
