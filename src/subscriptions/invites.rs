/// Invite code management
///
/// Subscription opt-in can be gated behind invite codes. A code carries a
/// use budget; every redemption is recorded, and an account re-redeeming a
/// code it already used does not burn another use.
use crate::error::{LensError, LensResult};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InviteCode {
    pub code: String,
    pub available_uses: i64,
    pub disabled: bool,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct InviteCodeManager {
    db: SqlitePool,
}

impl InviteCodeManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn generate_code() -> String {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();

        format!("lens-{}", code.to_lowercase())
    }

    pub async fn create_invite(&self, created_by: &str, uses: i64) -> LensResult<InviteCode> {
        let code = Self::generate_code();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO invite_code (code, available_uses, disabled, created_by, created_at)
             VALUES (?1, ?2, 0, ?3, ?4)",
        )
        .bind(&code)
        .bind(uses)
        .bind(created_by)
        .bind(&now)
        .execute(&self.db)
        .await?;

        Ok(InviteCode {
            code,
            available_uses: uses,
            disabled: false,
            created_by: created_by.to_string(),
            created_at: now,
        })
    }

    /// Validate and redeem a code. Every rejection is a Validation error, so
    /// callers treat them as permanent.
    pub async fn use_code(&self, code: &str, used_by: &str) -> LensResult<()> {
        let mut tx = self.db.begin().await?;

        let row: Option<(i64, bool)> =
            sqlx::query_as("SELECT available_uses, disabled FROM invite_code WHERE code = ?1")
                .bind(code)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((available_uses, disabled)) = row else {
            return Err(LensError::Validation("Unknown invite code".to_string()));
        };
        if disabled {
            return Err(LensError::Validation("Invite code is disabled".to_string()));
        }

        // The same account redeeming again is a no-op, not a second use
        let inserted = sqlx::query(
            "INSERT INTO invite_code_use (code, used_by, used_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(code, used_by) DO NOTHING",
        )
        .bind(code)
        .bind(used_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            if available_uses <= 0 {
                return Err(LensError::Validation(
                    "Invite code has no uses remaining".to_string(),
                ));
            }
            sqlx::query("UPDATE invite_code SET available_uses = available_uses - 1 WHERE code = ?1")
                .bind(code)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn disable_code(&self, code: &str) -> LensResult<()> {
        let result = sqlx::query("UPDATE invite_code SET disabled = 1 WHERE code = ?1")
            .bind(code)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LensError::NotFound(format!("No invite code {}", code)));
        }

        Ok(())
    }

    pub async fn get_code(&self, code: &str) -> LensResult<Option<InviteCode>> {
        let invite = sqlx::query_as::<_, InviteCode>("SELECT * FROM invite_code WHERE code = ?1")
            .bind(code)
            .fetch_optional(&self.db)
            .await?;

        Ok(invite)
    }

    pub async fn list_codes(&self, include_disabled: bool) -> LensResult<Vec<InviteCode>> {
        let query = if include_disabled {
            "SELECT * FROM invite_code ORDER BY created_at DESC"
        } else {
            "SELECT * FROM invite_code WHERE disabled = 0 ORDER BY created_at DESC"
        };

        let codes = sqlx::query_as::<_, InviteCode>(query)
            .fetch_all(&self.db)
            .await?;

        Ok(codes)
    }
}
