//! User and tenant directories plus the unit of work that commits staged
//! user changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use crate::models::user::{new_stamp, normalize_user_name};
use crate::models::{Tenant, User};
use crate::services::ServiceError;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look a user up by name; names compare case-insensitively.
    async fn find_by_name(&self, user_name: &str) -> Result<Option<User>, ServiceError>;
    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, ServiceError>;
    async fn find_by_tenant(&self, tenant_id: i64) -> Result<Vec<User>, ServiceError>;
    /// Stage `user` for the next save and give it a fresh concurrency stamp.
    async fn update(&self, user: &mut User) -> Result<(), ServiceError>;
    async fn delete(&self, user: &User) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_tenant(&self, tenant_id: i64) -> Result<Option<Tenant>, ServiceError>;
}

/// Atomic commit boundary for staged user changes.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Apply every staged change or none of them. A row whose stored stamp no
    /// longer matches the stamp it was loaded with fails the whole save with
    /// `ServiceError::ConcurrencyFailure`.
    async fn save_changes(&self) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone)]
enum PendingChange {
    Update { expected_stamp: String, user: User },
    Delete { expected_stamp: String, user_id: i64 },
}

/// In-memory user directory.
///
/// Clones share both the stored users and the staged changes. `scope()`
/// hands out a view over the same users with its own change set, which is
/// how two concurrent requests are modelled.
#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<i64, User>>>,
    pending: Arc<Mutex<Vec<PendingChange>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a user directly, bypassing the unit of work.
    pub fn insert(&self, mut user: User) -> Result<(), ServiceError> {
        user.normalized_user_name = normalize_user_name(&user.user_name);
        self.users
            .write()
            .map_err(|e| anyhow::anyhow!("User directory lock poisoned: {}", e))?
            .insert(user.user_id, user);
        Ok(())
    }

    /// New request scope over the same stored users.
    pub fn scope(&self) -> Self {
        Self {
            users: Arc::clone(&self.users),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Committed state of a user, ignoring anything staged.
    pub fn stored(&self, user_id: i64) -> Result<Option<User>, ServiceError> {
        Ok(self
            .users
            .read()
            .map_err(|e| anyhow::anyhow!("User directory lock poisoned: {}", e))?
            .get(&user_id)
            .cloned())
    }

    fn stage(&self, change: PendingChange) -> Result<(), ServiceError> {
        self.pending
            .lock()
            .map_err(|e| anyhow::anyhow!("Pending changes lock poisoned: {}", e))?
            .push(change);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_name(&self, user_name: &str) -> Result<Option<User>, ServiceError> {
        let normalized = normalize_user_name(user_name);
        let users = self
            .users
            .read()
            .map_err(|e| anyhow::anyhow!("User directory lock poisoned: {}", e))?;
        Ok(users
            .values()
            .find(|u| u.normalized_user_name == normalized)
            .cloned())
    }

    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, ServiceError> {
        self.stored(user_id)
    }

    async fn find_by_tenant(&self, tenant_id: i64) -> Result<Vec<User>, ServiceError> {
        let users = self
            .users
            .read()
            .map_err(|e| anyhow::anyhow!("User directory lock poisoned: {}", e))?;
        let mut found: Vec<User> = users
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .collect();
        found.sort_by_key(|u| u.user_id);
        Ok(found)
    }

    async fn update(&self, user: &mut User) -> Result<(), ServiceError> {
        let expected_stamp = std::mem::replace(&mut user.concurrency_stamp, new_stamp());
        user.normalized_user_name = normalize_user_name(&user.user_name);
        self.stage(PendingChange::Update {
            expected_stamp,
            user: user.clone(),
        })
    }

    async fn delete(&self, user: &User) -> Result<(), ServiceError> {
        self.stage(PendingChange::Delete {
            expected_stamp: user.concurrency_stamp.clone(),
            user_id: user.user_id,
        })
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUserDirectory {
    async fn save_changes(&self) -> Result<(), ServiceError> {
        let changes: Vec<PendingChange> = std::mem::take(
            &mut *self
                .pending
                .lock()
                .map_err(|e| anyhow::anyhow!("Pending changes lock poisoned: {}", e))?,
        );
        if changes.is_empty() {
            return Ok(());
        }

        let mut users = self
            .users
            .write()
            .map_err(|e| anyhow::anyhow!("User directory lock poisoned: {}", e))?;

        // Validate against a working copy so a conflict leaves nothing applied.
        let mut working = users.clone();
        for change in changes {
            match change {
                PendingChange::Update {
                    expected_stamp,
                    user,
                } => {
                    let current = working
                        .get(&user.user_id)
                        .ok_or(ServiceError::ConcurrencyFailure)?;
                    if current.concurrency_stamp != expected_stamp {
                        tracing::warn!(user_id = user.user_id, "Concurrent user update detected");
                        return Err(ServiceError::ConcurrencyFailure);
                    }
                    working.insert(user.user_id, user);
                }
                PendingChange::Delete {
                    expected_stamp,
                    user_id,
                } => {
                    let current = working
                        .get(&user_id)
                        .ok_or(ServiceError::ConcurrencyFailure)?;
                    if current.concurrency_stamp != expected_stamp {
                        return Err(ServiceError::ConcurrencyFailure);
                    }
                    working.remove(&user_id);
                }
            }
        }
        *users = working;
        Ok(())
    }
}

/// In-memory tenant directory.
#[derive(Clone, Default)]
pub struct InMemoryTenantDirectory {
    tenants: Arc<RwLock<HashMap<i64, Tenant>>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant: Tenant) -> Result<(), ServiceError> {
        self.tenants
            .write()
            .map_err(|e| anyhow::anyhow!("Tenant directory lock poisoned: {}", e))?
            .insert(tenant.tenant_id, tenant);
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_tenant(&self, tenant_id: i64) -> Result<Option<Tenant>, ServiceError> {
        Ok(self
            .tenants
            .read()
            .map_err(|e| anyhow::anyhow!("Tenant directory lock poisoned: {}", e))?
            .get(&tenant_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with_alice() -> InMemoryUserDirectory {
        let directory = InMemoryUserDirectory::new();
        directory
            .insert(User::new(1, 7, "alice".to_string(), "hash".to_string()))
            .unwrap();
        directory
    }

    #[tokio::test]
    async fn test_find_by_name_is_case_insensitive() {
        let directory = directory_with_alice();
        let user = directory.find_by_name("ALICE").await.unwrap();
        assert_eq!(user.map(|u| u.user_id), Some(1));
        assert!(directory.find_by_name("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_is_invisible_until_saved() {
        let directory = directory_with_alice();
        let mut user = directory.find_by_id(1).await.unwrap().unwrap();
        user.language_code = Some("fr".to_string());

        directory.update(&mut user).await.unwrap();
        assert_eq!(directory.stored(1).unwrap().unwrap().language_code, None);

        directory.save_changes().await.unwrap();
        let stored = directory.stored(1).unwrap().unwrap();
        assert_eq!(stored.language_code.as_deref(), Some("fr"));
        assert_eq!(stored.concurrency_stamp, user.concurrency_stamp);
    }

    #[tokio::test]
    async fn test_repeated_updates_in_one_scope_chain() {
        let directory = directory_with_alice();
        let mut user = directory.find_by_id(1).await.unwrap().unwrap();

        user.access_failed_count = 0;
        directory.update(&mut user).await.unwrap();
        user.last_access_utc = Some(chrono::Utc::now());
        directory.update(&mut user).await.unwrap();

        directory.save_changes().await.unwrap();
        assert!(directory.stored(1).unwrap().unwrap().last_access_utc.is_some());
    }

    #[tokio::test]
    async fn test_conflicting_scopes_fail_with_concurrency_failure() {
        let directory = directory_with_alice();
        let first = directory.scope();
        let second = directory.scope();

        let mut a = first.find_by_id(1).await.unwrap().unwrap();
        let mut b = second.find_by_id(1).await.unwrap().unwrap();

        first.update(&mut a).await.unwrap();
        second.update(&mut b).await.unwrap();

        first.save_changes().await.unwrap();
        let result = second.save_changes().await;
        assert!(matches!(result, Err(ServiceError::ConcurrencyFailure)));
        assert_eq!(
            directory.stored(1).unwrap().unwrap().concurrency_stamp,
            a.concurrency_stamp
        );
    }

    #[tokio::test]
    async fn test_find_by_tenant() {
        let directory = directory_with_alice();
        directory
            .insert(User::new(2, 8, "bob".to_string(), "hash".to_string()))
            .unwrap();

        let users = directory.find_by_tenant(7).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_name, "alice");
    }

    #[tokio::test]
    async fn test_delete() {
        let directory = directory_with_alice();
        let user = directory.find_by_id(1).await.unwrap().unwrap();
        directory.delete(&user).await.unwrap();
        directory.save_changes().await.unwrap();
        assert!(directory.stored(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tenant_lookup() {
        let tenants = InMemoryTenantDirectory::new();
        tenants.insert(Tenant::new(7)).unwrap();
        assert!(tenants.find_tenant(7).await.unwrap().unwrap().is_active());
        assert!(tenants.find_tenant(8).await.unwrap().is_none());
    }
}
