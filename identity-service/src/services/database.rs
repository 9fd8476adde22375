//! PostgreSQL adapter.
//!
//! `Database` is the shared, pool-backed token store. `DatabaseSession` is a
//! per-request view that stages user writes and commits them in one
//! transaction, with optimistic concurrency on `concurrency_stamp`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use sqlx::postgres::PgPool;

use crate::models::user::{new_stamp, normalize_user_name};
use crate::models::{Tenant, Token, User};
use crate::services::directory::{TenantDirectory, UnitOfWork, UserDirectory};
use crate::services::token_store::{BaseTokenStore, TokenStream};
use crate::services::ServiceError;

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                ServiceError::Database(e)
            })?;
        Ok(())
    }

    /// Start a request scope with its own unit of work.
    pub fn session(&self) -> DatabaseSession {
        DatabaseSession {
            pool: self.pool.clone(),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl BaseTokenStore for Database {
    async fn find_by_id(&self, token_id: &str) -> Result<Option<Token>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE token_id = $1")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    fn find_by_subject<'a>(&'a self, subject: &'a str) -> TokenStream<'a> {
        sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE subject = $1")
            .bind(subject)
            .fetch(&self.pool)
            .map_err(ServiceError::from)
            .boxed()
    }

    fn find_by_user_and_tenant<'a>(
        &'a self,
        user_id: &'a str,
        tenant_id: &'a str,
        status: &'a str,
        token_type: &'a str,
    ) -> TokenStream<'a> {
        // Explicit join key; the application row must be the tenant's own.
        sqlx::query_as::<_, Token>(
            r#"
            SELECT t.*
            FROM tokens t
            INNER JOIN applications a ON a.application_id = t.application_id
            WHERE t.subject = $1
              AND t.tenant_id = $2
              AND t.status = $3
              AND t.token_type = $4
              AND a.application_id = $2
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(status)
        .bind(token_type)
        .fetch(&self.pool)
        .map_err(ServiceError::from)
        .boxed()
    }

    async fn create(&self, token: &Token) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token_id, application_id, authorization_id, subject, tenant_id,
                                token_type, status, payload, reference_id, properties,
                                concurrency_stamp, creation_utc, expiration_utc, redemption_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&token.token_id)
        .bind(&token.application_id)
        .bind(&token.authorization_id)
        .bind(&token.subject)
        .bind(&token.tenant_id)
        .bind(&token.token_type)
        .bind(&token.status)
        .bind(&token.payload)
        .bind(&token.reference_id)
        .bind(&token.properties)
        .bind(&token.concurrency_stamp)
        .bind(token.creation_utc)
        .bind(token.expiration_utc)
        .bind(token.redemption_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, token: &mut Token) -> Result<(), ServiceError> {
        let stamp = new_stamp();
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET application_id = $1, authorization_id = $2, subject = $3, tenant_id = $4,
                token_type = $5, status = $6, payload = $7, reference_id = $8, properties = $9,
                creation_utc = $10, expiration_utc = $11, redemption_utc = $12,
                concurrency_stamp = $13
            WHERE token_id = $14 AND concurrency_stamp = $15
            "#,
        )
        .bind(&token.application_id)
        .bind(&token.authorization_id)
        .bind(&token.subject)
        .bind(&token.tenant_id)
        .bind(&token.token_type)
        .bind(&token.status)
        .bind(&token.payload)
        .bind(&token.reference_id)
        .bind(&token.properties)
        .bind(token.creation_utc)
        .bind(token.expiration_utc)
        .bind(token.redemption_utc)
        .bind(&stamp)
        .bind(&token.token_id)
        .bind(&token.concurrency_stamp)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::ConcurrencyFailure);
        }
        token.concurrency_stamp = stamp;
        Ok(())
    }
}

enum PendingWrite {
    Update { expected_stamp: String, user: User },
    Delete { expected_stamp: String, user_id: i64 },
}

/// Request-scoped user and tenant access over the shared pool.
#[derive(Clone)]
pub struct DatabaseSession {
    pool: PgPool,
    pending: Arc<Mutex<Vec<PendingWrite>>>,
}

impl DatabaseSession {
    fn stage(&self, write: PendingWrite) -> Result<(), ServiceError> {
        self.pending
            .lock()
            .map_err(|e| anyhow::anyhow!("Pending writes lock poisoned: {}", e))?
            .push(write);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for DatabaseSession {
    async fn find_by_name(&self, user_name: &str) -> Result<Option<User>, ServiceError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE normalized_user_name = $1")
                .bind(normalize_user_name(user_name))
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_tenant(&self, tenant_id: i64) -> Result<Vec<User>, ServiceError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE tenant_id = $1 ORDER BY user_id")
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn update(&self, user: &mut User) -> Result<(), ServiceError> {
        let expected_stamp = std::mem::replace(&mut user.concurrency_stamp, new_stamp());
        user.normalized_user_name = normalize_user_name(&user.user_name);
        self.stage(PendingWrite::Update {
            expected_stamp,
            user: user.clone(),
        })
    }

    async fn delete(&self, user: &User) -> Result<(), ServiceError> {
        self.stage(PendingWrite::Delete {
            expected_stamp: user.concurrency_stamp.clone(),
            user_id: user.user_id,
        })
    }
}

#[async_trait]
impl TenantDirectory for DatabaseSession {
    async fn find_tenant(&self, tenant_id: i64) -> Result<Option<Tenant>, ServiceError> {
        Ok(sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[async_trait]
impl UnitOfWork for DatabaseSession {
    async fn save_changes(&self) -> Result<(), ServiceError> {
        let writes: Vec<PendingWrite> = std::mem::take(
            &mut *self
                .pending
                .lock()
                .map_err(|e| anyhow::anyhow!("Pending writes lock poisoned: {}", e))?,
        );
        if writes.is_empty() {
            return Ok(());
        }

        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;
        for write in writes {
            let rows = match write {
                PendingWrite::Update {
                    expected_stamp,
                    user,
                } => {
                    sqlx::query(
                        r#"
                        UPDATE users
                        SET user_name = $1, normalized_user_name = $2, language_code = $3,
                            active = $4, is_administrator = $5, tenant_administrator = $6,
                            password_hash = $7, password_confirmed = $8, two_factor_enabled = $9,
                            authenticator_key = $10, security_stamp = $11, concurrency_stamp = $12,
                            password_token = $13, password_token_expiry_utc = $14,
                            access_failed_count = $15, lockout_end_utc = $16, last_access_utc = $17
                        WHERE user_id = $18 AND concurrency_stamp = $19
                        "#,
                    )
                    .bind(&user.user_name)
                    .bind(&user.normalized_user_name)
                    .bind(&user.language_code)
                    .bind(user.active)
                    .bind(user.is_administrator)
                    .bind(user.tenant_administrator)
                    .bind(&user.password_hash)
                    .bind(user.password_confirmed)
                    .bind(user.two_factor_enabled)
                    .bind(&user.authenticator_key)
                    .bind(&user.security_stamp)
                    .bind(&user.concurrency_stamp)
                    .bind(&user.password_token)
                    .bind(user.password_token_expiry_utc)
                    .bind(user.access_failed_count)
                    .bind(user.lockout_end_utc)
                    .bind(user.last_access_utc)
                    .bind(user.user_id)
                    .bind(&expected_stamp)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
                }
                PendingWrite::Delete {
                    expected_stamp,
                    user_id,
                } => sqlx::query("DELETE FROM users WHERE user_id = $1 AND concurrency_stamp = $2")
                    .bind(user_id)
                    .bind(&expected_stamp)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected(),
            };

            if rows == 0 {
                tracing::warn!("Concurrent user update detected, rolling back");
                return Err(ServiceError::ConcurrencyFailure);
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
