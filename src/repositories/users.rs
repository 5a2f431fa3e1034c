use crate::models::users::{Identifier, NewUser, User, UserSummary};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserRepository {
    conn: PgPool,
}

impl UserRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    pub async fn insert_user(&self, user: NewUser) -> Result<User, anyhow::Error> {
        let user_id = Uuid::new_v4().hyphenated().to_string();

        let user = sqlx::query_as::<_, User>(
            r#"
                INSERT INTO users (id, email, phone, name, password_hash, otp_hash, otp_expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(user.email)
        .bind(user.phone)
        .bind(user.name)
        .bind(user.password_hash)
        .bind(user.otp_hash)
        .bind(user.otp_expires_at)
        .fetch_one(&self.conn)
        .await?;

        Ok(user)
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_identifier(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<User>, anyhow::Error> {
        // column() only ever yields one of two fixed names.
        let query = format!("SELECT * FROM users WHERE {} = $1", identifier.column());
        let user = sqlx::query_as::<_, User>(&query)
            .bind(identifier.value())
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    pub async fn set_otp(
        &self,
        user_id: &str,
        otp_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"UPDATE users SET otp_hash = $1, otp_expires_at = $2, otp_attempts = 0,
            updated_at = CURRENT_TIMESTAMP WHERE id = $3"#,
        )
        .bind(otp_hash)
        .bind(expires_at)
        .bind(user_id)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    /// Clears the code only if it is still the one that was checked, so two
    /// concurrent verifications cannot both succeed.
    pub async fn consume_otp(&self, user_id: &str, otp_hash: &str) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"UPDATE users SET otp_hash = NULL, otp_expires_at = NULL, otp_attempts = 0,
            updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND otp_hash = $2"#,
        )
        .bind(user_id)
        .bind(otp_hash)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Counts a wrong guess against the code `otp_hash`. Once `max_attempts`
    /// guesses have failed the code is cleared. Returns true only when this
    /// call cleared it; a code that was already replaced is left alone.
    pub async fn record_otp_failure(
        &self,
        user_id: &str,
        otp_hash: &str,
        max_attempts: i32,
    ) -> Result<bool, anyhow::Error> {
        let cleared = sqlx::query_scalar::<_, bool>(
            r#"
                UPDATE users SET
                    otp_attempts = otp_attempts + 1,
                    otp_hash = CASE WHEN otp_attempts + 1 >= $3 THEN NULL ELSE otp_hash END,
                    otp_expires_at = CASE WHEN otp_attempts + 1 >= $3 THEN NULL ELSE otp_expires_at END,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $1 AND otp_hash = $2
                RETURNING otp_hash IS NULL
            "#,
        )
        .bind(user_id)
        .bind(otp_hash)
        .bind(max_attempts)
        .fetch_optional(&self.conn)
        .await?;

        Ok(cleared.unwrap_or(false))
    }

    pub async fn get_summaries(&self, ids: &[String]) -> Result<Vec<UserSummary>, anyhow::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = sqlx::query_as::<_, UserSummary>(
            "SELECT id, name, avatar FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }
}
