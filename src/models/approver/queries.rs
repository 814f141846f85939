use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::types::*;
use crate::errors::{AppError, is_unique_violation};
use crate::store::DirectoryStore;

/// Users, home roles and acting delegations stored in Postgres.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct DelegationRow {
    id: i64,
    user_id: i64,
    level_id: i64,
    division_id: Option<String>,
    department_id: Option<String>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        PgDirectory { pool }
    }

    /// Create a user and return its id.
    pub async fn create_user(&self, username: &str, display_name: &str, email: &str) -> Result<i64, AppError> {
        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO users (username, display_name, email) VALUES ($1, $2, $3) RETURNING id")
                .bind(username)
                .bind(display_name)
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        AppError::Validation(format!("username '{username}' is already taken"))
                    } else {
                        AppError::Db(e)
                    }
                })?;
        Ok(id)
    }

    pub async fn assign_role(
        &self,
        user_id: i64,
        level_id: i64,
        division_id: Option<&str>,
        department_id: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO role_assignments (user_id, level_id, division_id, department_id) VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(level_id)
        .bind(division_id)
        .bind(department_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_delegation(
        &self,
        user_id: i64,
        level_id: i64,
        division_id: Option<&str>,
        department_id: Option<&str>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        if ends_at < starts_at {
            return Err(AppError::Validation("acting delegation ends before it starts".to_string()));
        }
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO acting_delegations (user_id, level_id, division_id, department_id, starts_at, ends_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(user_id)
        .bind(level_id)
        .bind(division_id)
        .bind(department_id)
        .bind(starts_at)
        .bind(ends_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl DirectoryStore for PgDirectory {
    async fn role_assignments(&self, level_id: i64) -> Result<Vec<RoleAssignment>, AppError> {
        let rows: Vec<(i64, i64, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT user_id, level_id, division_id, department_id FROM role_assignments \
             WHERE level_id = $1 ORDER BY id",
        )
        .bind(level_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, level_id, division_id, department_id)| RoleAssignment {
                user_id,
                level_id,
                division_id,
                department_id,
            })
            .collect())
    }

    async fn acting_delegations(&self, level_id: i64, at: DateTime<Utc>) -> Result<Vec<ActingDelegation>, AppError> {
        let rows = sqlx::query_as::<_, DelegationRow>(
            "SELECT id, user_id, level_id, division_id, department_id, starts_at, ends_at \
             FROM acting_delegations \
             WHERE level_id = $1 AND starts_at <= $2 AND ends_at >= $2 \
             ORDER BY id",
        )
        .bind(level_id)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ActingDelegation {
                id: r.id,
                user_id: r.user_id,
                level_id: r.level_id,
                division_id: r.division_id,
                department_id: r.department_id,
                starts_at: r.starts_at,
                ends_at: r.ends_at,
            })
            .collect())
    }

    async fn users(&self, ids: &[i64]) -> Result<Vec<UserSummary>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
            "SELECT id, username, display_name, email FROM users WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, username, display_name, email)| UserSummary {
                id,
                username,
                display_name,
                email,
            })
            .collect())
    }
}
