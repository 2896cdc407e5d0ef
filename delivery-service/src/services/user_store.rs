use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::DeliveryResult;

/// External user-store collaborator.
///
/// The coordinator only needs an existence check; account CRUD, password
/// hashing, and sessions live elsewhere.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn exists(&self, user_id: Uuid) -> DeliveryResult<bool>;
}

pub struct PostgresUserStore {
    db: Pool<Postgres>,
}

impl PostgresUserStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn exists(&self, user_id: Uuid) -> DeliveryResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(user_id)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }
}

/// In-memory user store for tests.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: DashMap<Uuid, ()>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(ids: &[Uuid]) -> Self {
        let store = Self::new();
        for id in ids {
            store.users.insert(*id, ());
        }
        store
    }

    pub fn add(&self, user_id: Uuid) {
        self.users.insert(user_id, ());
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn exists(&self, user_id: Uuid) -> DeliveryResult<bool> {
        Ok(self.users.contains_key(&user_id))
    }
}
