use async_trait::async_trait;
use uuid::Uuid;

use crate::models::user::Profile;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Profiles that can be matched to a billing customer.
    async fn list_profiles_with_email(&self) -> Result<Vec<Profile>, sqlx::Error>;
    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, sqlx::Error>;
    async fn find_profile_by_id(&self, user_id: Uuid) -> Result<Option<Profile>, sqlx::Error>;
}
