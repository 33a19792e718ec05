use super::util::is_dup_key;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, Row, Transaction};
use uuid::Uuid;

/// Durable credential store. Every multi-statement operation locks the owning
/// `user_account` row first, so rotations, revocations and password changes of
/// one user serialize.
pub struct MySqlCredentialStore {
    pool: MySqlPool,
}

#[inline]
fn store_err(e: impl std::fmt::Display) -> AuthError {
    AuthError::Store(e.to_string())
}

impl MySqlCredentialStore {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlCredentialStore { pool }
    }

    #[inline]
    fn uid_as_bytes(id: &UserId) -> &[u8] {
        id.0.as_bytes()
    }

    #[inline]
    fn uid_from_bytes(id: &[u8]) -> Result<UserId, AuthError> {
        Ok(UserId(Uuid::from_slice(id).map_err(store_err)?))
    }

    fn row_to_credentials(row: MySqlRow) -> Result<CredentialRecord, AuthError> {
        let user_id_bytes: Vec<u8> = row.try_get("user_id").map_err(store_err)?;
        let role: String = row.try_get("role").map_err(store_err)?;

        Ok(CredentialRecord {
            user_id: Self::uid_from_bytes(&user_id_bytes)?,
            username: row.try_get("username").map_err(store_err)?,
            email: row.try_get("email").map_err(store_err)?,
            password_hash: row.try_get("password_hash").map_err(store_err)?,
            role: role.parse::<Role>().map_err(AuthError::Store)?,
            created_at: row.try_get("created_at").map_err(store_err)?,
        })
    }

    fn row_to_token(row: MySqlRow) -> Result<RefreshTokenRecord, AuthError> {
        Ok(RefreshTokenRecord {
            digest: row.try_get("token_digest").map_err(store_err)?,
            expires_at: row.try_get("expires_at").map_err(store_err)?,
            created_at: row.try_get("created_at").map_err(store_err)?,
        })
    }

    /// Returns false if the user does not exist.
    async fn lock_user(
        tx: &mut Transaction<'_, MySql>,
        user_id: &UserId,
    ) -> Result<bool, AuthError> {
        let row: Option<MySqlRow> =
            sqlx::query("SELECT user_id FROM user_account WHERE user_id = ? FOR UPDATE")
                .bind(Self::uid_as_bytes(user_id))
                .fetch_optional(&mut **tx)
                .await
                .map_err(store_err)?;
        Ok(row.is_some())
    }

    async fn insert_token(
        tx: &mut Transaction<'_, MySql>,
        user_id: &UserId,
        record: &RefreshTokenRecord,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
INSERT INTO refresh_token (token_digest, user_id, expires_at, created_at)
VALUES (?, ?, ?, ?)
"#,
        )
        .bind(&record.digest)
        .bind(Self::uid_as_bytes(user_id))
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Keep the `cap` newest tokens of the user by insertion sequence.
    async fn evict_beyond(
        tx: &mut Transaction<'_, MySql>,
        user_id: &UserId,
        cap: usize,
    ) -> Result<usize, AuthError> {
        let res = sqlx::query(
            r#"
DELETE FROM refresh_token
WHERE user_id = ?
  AND seq <= (
    SELECT seq FROM (
      SELECT seq FROM refresh_token
      WHERE user_id = ?
      ORDER BY seq DESC
      LIMIT 1 OFFSET ?
    ) AS boundary
  )
"#,
        )
        .bind(Self::uid_as_bytes(user_id))
        .bind(Self::uid_as_bytes(user_id))
        .bind(cap as u64)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(res.rows_affected() as usize)
    }

    async fn delete_all_tokens(
        tx: &mut Transaction<'_, MySql>,
        user_id: &UserId,
    ) -> Result<usize, AuthError> {
        let res = sqlx::query("DELETE FROM refresh_token WHERE user_id = ?")
            .bind(Self::uid_as_bytes(user_id))
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        Ok(res.rows_affected() as usize)
    }
}

#[async_trait::async_trait]
impl CredentialStore for MySqlCredentialStore {
    async fn create_user(&self, record: CredentialRecord) -> Result<(), AuthError> {
        let res = sqlx::query(
            r#"
INSERT INTO user_account (user_id, username, username_key, email, password_hash, role, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(Self::uid_as_bytes(&record.user_id))
        .bind(&record.username)
        .bind(username_key(&record.username))
        .bind(&record.email)
        .bind(&record.password_hash)
        .bind(record.role.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_dup_key(&e) => Err(AuthError::UserExists),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, AuthError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, username, email, password_hash, role, created_at
FROM user_account
WHERE email = ?
"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row_opt.map(Self::row_to_credentials).transpose()
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<CredentialRecord>, AuthError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, username, email, password_hash, role, created_at
FROM user_account
WHERE user_id = ?
"#,
        )
        .bind(Self::uid_as_bytes(&user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row_opt.map(Self::row_to_credentials).transpose()
    }

    async fn push_refresh_token(
        &self,
        user_id: UserId,
        record: RefreshTokenRecord,
        cap: usize,
    ) -> Result<usize, AuthError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        if !Self::lock_user(&mut tx, &user_id).await? {
            return Err(AuthError::UserNotFound);
        }
        Self::insert_token(&mut tx, &user_id, &record).await?;
        let evicted = Self::evict_beyond(&mut tx, &user_id, cap).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(evicted)
    }

    async fn rotate_refresh_token(
        &self,
        presented_digest: &str,
        replacement: RefreshTokenRecord,
        cap: usize,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let owner: Option<MySqlRow> =
            sqlx::query("SELECT user_id FROM refresh_token WHERE token_digest = ?")
                .bind(presented_digest)
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_err)?;
        let Some(owner) = owner else {
            return Ok(RotateOutcome::Missing);
        };
        let owner_bytes: Vec<u8> = owner.try_get("user_id").map_err(store_err)?;
        let user_id = Self::uid_from_bytes(&owner_bytes)?;

        if !Self::lock_user(&mut tx, &user_id).await? {
            return Ok(RotateOutcome::Missing);
        }

        // Re-read under the user lock; a concurrent rotation may have won.
        let presented: Option<MySqlRow> = sqlx::query(
            r#"
SELECT token_digest, expires_at, created_at
FROM refresh_token
WHERE token_digest = ? AND user_id = ?
FOR UPDATE
"#,
        )
        .bind(presented_digest)
        .bind(Self::uid_as_bytes(&user_id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;
        let Some(presented) = presented.map(Self::row_to_token).transpose()? else {
            return Ok(RotateOutcome::Missing);
        };

        sqlx::query("DELETE FROM refresh_token WHERE token_digest = ?")
            .bind(presented_digest)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        if presented.is_expired(now) {
            tx.commit().await.map_err(store_err)?;
            return Ok(RotateOutcome::Expired { user_id });
        }

        Self::insert_token(&mut tx, &user_id, &replacement).await?;
        let evicted = Self::evict_beyond(&mut tx, &user_id, cap).await?;
        tx.commit().await.map_err(store_err)?;

        Ok(RotateOutcome::Rotated { user_id, evicted })
    }

    async fn revoke_refresh_token(
        &self,
        user_id: UserId,
        digest: &str,
    ) -> Result<bool, AuthError> {
        let res = sqlx::query("DELETE FROM refresh_token WHERE token_digest = ? AND user_id = ?")
            .bind(digest)
            .bind(Self::uid_as_bytes(&user_id))
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(res.rows_affected() > 0)
    }

    async fn revoke_all(&self, user_id: UserId) -> Result<usize, AuthError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        if !Self::lock_user(&mut tx, &user_id).await? {
            return Ok(0);
        }
        let revoked = Self::delete_all_tokens(&mut tx, &user_id).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(revoked)
    }

    async fn change_password(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<usize, AuthError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        if !Self::lock_user(&mut tx, &user_id).await? {
            return Err(AuthError::UserNotFound);
        }

        sqlx::query("UPDATE user_account SET password_hash = ? WHERE user_id = ?")
            .bind(password_hash)
            .bind(Self::uid_as_bytes(&user_id))
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let revoked = Self::delete_all_tokens(&mut tx, &user_id).await?;

        tx.commit().await.map_err(store_err)?;
        Ok(revoked)
    }

    async fn refresh_tokens(&self, user_id: UserId) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let rows: Vec<MySqlRow> = sqlx::query(
            r#"
SELECT token_digest, expires_at, created_at
FROM refresh_token
WHERE user_id = ?
ORDER BY seq ASC
"#,
        )
        .bind(Self::uid_as_bytes(&user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(Self::row_to_token).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let res = sqlx::query("DELETE FROM refresh_token WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(res.rows_affected() as usize)
    }
}
