use axum::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::users::repo::{StoreError, StoreResult, UserStore};
use crate::users::repo_types::{NewUser, PublicUser, User};

/// In-process store with the same uniqueness rules as the users table.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|u| {
                username.is_some_and(|n| u.username == n) || email.is_some_and(|e| u.email == e)
            })
            .cloned())
    }

    async fn find_public_by_id(&self, id: Uuid) -> StoreResult<Option<PublicUser>> {
        Ok(self.find_by_id(id).await?.map(PublicUser::from))
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if users
            .iter()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StoreError::Duplicate);
        }
        let now = OffsetDateTime::now_utc();
        let record = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar: user.avatar,
            cover_image: user.cover_image,
            password_hash: user.password_hash,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        users.push(record.clone());
        Ok(record)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.iter_mut().find(|u| u.id == id) {
            Some(u) => {
                u.refresh_token = token.map(str::to_string);
                u.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        next: &str,
    ) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users
            .iter_mut()
            .find(|u| u.id == id && u.refresh_token.as_deref() == Some(expected))
        {
            Some(u) => {
                u.refresh_token = Some(next.to_string());
                u.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            full_name: "Test User".into(),
            avatar: "https://media.local/a.png".into(),
            cover_image: String::new(),
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_username_or_email() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice", "a@x.com")).await.unwrap();

        let err = store.create(new_user("alice", "b@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
        let err = store.create(new_user("bob", "a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[tokio::test]
    async fn lookup_ignores_absent_identifier() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice", "a@x.com")).await.unwrap();

        assert!(store
            .find_by_username_or_email(None, Some("a@x.com"))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_username_or_email(None, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn set_refresh_token_reports_missing_user() {
        let store = MemoryUserStore::new();
        let created = store.create(new_user("alice", "a@x.com")).await.unwrap();

        assert!(store.set_refresh_token(created.id, Some("t")).await.unwrap());
        let stored = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("t"));

        assert!(!store.set_refresh_token(Uuid::new_v4(), None).await.unwrap());
    }

    #[tokio::test]
    async fn rotate_refresh_token_requires_current_value() {
        let store = MemoryUserStore::new();
        let created = store.create(new_user("alice", "a@x.com")).await.unwrap();
        store.set_refresh_token(created.id, Some("t1")).await.unwrap();

        assert!(store.rotate_refresh_token(created.id, "t1", "t2").await.unwrap());
        assert!(!store.rotate_refresh_token(created.id, "t1", "t3").await.unwrap());

        let stored = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("t2"));

        store.set_refresh_token(created.id, None).await.unwrap();
        assert!(!store.rotate_refresh_token(created.id, "t2", "t4").await.unwrap());
    }
}
