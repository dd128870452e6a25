//! `PostgreSQL` adapter for the storage ports.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use tracing::{debug, info_span, Instrument};

use super::{
    Category, ForumStore, NewTopic, NewUser, Page, PageRequest, SessionStore, Store, StoreError,
    Topic, UserRecord, UserStore, UserUpdate,
};
use crate::api::auth::identity::{CurrentUser, Role};

pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str = "id, email, username, name, password_hash, confirmed, role_id, \
     EXTRACT(EPOCH FROM member_since)::BIGINT AS member_since_unix";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and seed roles. Safe to run on every start.
    ///
    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "DDL");
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to apply schema")?;
        Ok(())
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Map constraint violations to typed errors; everything else becomes `Backend`.
fn classify(err: sqlx::Error, context: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => {
                return match db_err.constraint() {
                    Some("users_email_key") => StoreError::DuplicateEmail,
                    Some("users_username_key") => StoreError::DuplicateUsername,
                    _ => StoreError::DuplicateName,
                };
            }
            Some("23503") => return StoreError::Referenced,
            _ => {}
        }
    }
    StoreError::Backend(anyhow::Error::new(err).context(context))
}

/// A `role_id` outside the seeded roles means the table was edited by hand.
fn role_from_id(id: i16) -> Result<Role, StoreError> {
    Role::from_id(id).ok_or_else(|| StoreError::Backend(anyhow!("unknown role id {id}")))
}

fn user_from_row(row: &PgRow) -> Result<CurrentUser, StoreError> {
    Ok(CurrentUser {
        id: row.get("id"),
        email: row.get("email"),
        username: row.get("username"),
        name: row.get("name"),
        confirmed: row.get("confirmed"),
        role: role_from_id(row.get("role_id"))?,
        member_since_unix: row.get("member_since_unix"),
    })
}

fn record_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
    Ok(UserRecord {
        user: user_from_row(row)?,
        password_hash: row.get("password_hash"),
    })
}

fn topic_from_row(row: &PgRow) -> Topic {
    Topic {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        image: row.get("image"),
        category_id: row.get("category_id"),
        category_name: row.get("category_name"),
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn affected_or_not_found(rows: u64) -> Result<(), StoreError> {
    if rows == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: NewUser) -> Result<CurrentUser, StoreError> {
        let query = format!(
            "INSERT INTO users (email, username, name, password_hash, role_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&user.email)
            .bind(&user.username)
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.role.id())
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(|err| classify(err, "failed to insert user"))?;
        user_from_row(&row)
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| classify(err, "failed to lookup user by id"))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| classify(err, "failed to lookup user by email"))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn set_confirmed(&self, id: i64) -> Result<(), StoreError> {
        let query = "UPDATE users SET confirmed = TRUE WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| classify(err, "failed to confirm user"))?;
        affected_or_not_found(result.rows_affected())
    }

    async fn update_email(&self, id: i64, email: &str) -> Result<(), StoreError> {
        let query = "UPDATE users SET email = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(email)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| classify(err, "failed to update email"))?;
        affected_or_not_found(result.rows_affected())
    }

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        let query = "UPDATE users SET password_hash = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| classify(err, "failed to update password"))?;
        affected_or_not_found(result.rows_affected())
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<CurrentUser, StoreError> {
        let query = format!(
            "UPDATE users SET email = $2, username = $3, name = $4, confirmed = $5, role_id = $6 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&update.email)
            .bind(&update.username)
            .bind(&update.name)
            .bind(update.confirmed)
            .bind(update.role.id())
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await
            .map_err(|err| classify(err, "failed to update user"))?;
        row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)?
    }

    async fn list_users_except(&self, id: i64) -> Result<Vec<CurrentUser>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id <> $1 ORDER BY id");
        let rows = sqlx::query(&query)
            .bind(id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| classify(err, "failed to list users"))?;
        rows.iter().map(user_from_row).collect()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(
        &self,
        token_hash: &[u8],
        user_id: i64,
        ttl_seconds: i64,
        remember: bool,
    ) -> Result<(), StoreError> {
        let prune = "DELETE FROM user_sessions WHERE expires_at <= NOW()";
        let pruned = sqlx::query(prune)
            .execute(&self.pool)
            .instrument(query_span("DELETE", prune))
            .await
            .map_err(|err| classify(err, "failed to prune sessions"))?;
        if pruned.rows_affected() > 0 {
            debug!(rows = pruned.rows_affected(), "pruned expired sessions");
        }

        let query = r"
            INSERT INTO user_sessions (token_hash, user_id, remember, expires_at)
            VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(remember)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| classify(err, "failed to insert session"))?;
        Ok(())
    }

    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<CurrentUser>, StoreError> {
        let query = r"
            SELECT u.id, u.email, u.username, u.name, u.confirmed, u.role_id,
                   EXTRACT(EPOCH FROM u.member_since)::BIGINT AS member_since_unix
            FROM user_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = $1 AND s.expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| classify(err, "failed to lookup session"))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        let query = "DELETE FROM user_sessions WHERE token_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| classify(err, "failed to delete session"))?;
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: i64) -> Result<u64, StoreError> {
        let query = "DELETE FROM user_sessions WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| classify(err, "failed to delete user sessions"))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ForumStore for PgStore {
    async fn insert_category(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Category, StoreError> {
        let query = r"
            INSERT INTO topic_categories (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description
        ";
        let row = sqlx::query(query)
            .bind(name)
            .bind(description)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| classify(err, "failed to insert category"))?;
        Ok(Category {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
        })
    }

    async fn list_categories(&self, page: PageRequest) -> Result<Page<Category>, StoreError> {
        let count_query = "SELECT COUNT(*) AS total FROM topic_categories";
        let total: i64 = sqlx::query(count_query)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", count_query))
            .await
            .map_err(|err| classify(err, "failed to count categories"))?
            .get("total");

        let query = r"
            SELECT id, name, description
            FROM topic_categories
            ORDER BY id
            LIMIT $1 OFFSET $2
        ";
        let rows = sqlx::query(query)
            .bind(i64::from(page.per_page))
            .bind(to_i64(page.offset()))
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| classify(err, "failed to list categories"))?;

        let items = rows
            .iter()
            .map(|row| Category {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
            })
            .collect();
        Ok(Page::new(items, page, u64::try_from(total).unwrap_or(0)))
    }

    async fn all_categories(&self) -> Result<Vec<Category>, StoreError> {
        let query = "SELECT id, name, description FROM topic_categories ORDER BY name";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| classify(err, "failed to list categories"))?;
        Ok(rows
            .iter()
            .map(|row| Category {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
            })
            .collect())
    }

    async fn delete_category(&self, id: i64) -> Result<(), StoreError> {
        let query = "DELETE FROM topic_categories WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| classify(err, "failed to delete category"))?;
        affected_or_not_found(result.rows_affected())
    }

    async fn insert_topic(&self, topic: NewTopic) -> Result<Topic, StoreError> {
        let query = r"
            WITH inserted AS (
                INSERT INTO topics (name, description, image, category_id)
                VALUES ($1, $2, $3, $4)
                RETURNING id, name, description, image, category_id
            )
            SELECT i.id, i.name, i.description, i.image, i.category_id, c.name AS category_name
            FROM inserted i
            JOIN topic_categories c ON c.id = i.category_id
        ";
        let row = sqlx::query(query)
            .bind(&topic.name)
            .bind(&topic.description)
            .bind(topic.image.as_deref())
            .bind(topic.category_id)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| classify(err, "failed to insert topic"))?;
        Ok(topic_from_row(&row))
    }

    async fn list_topics(&self, page: PageRequest) -> Result<Page<Topic>, StoreError> {
        let count_query = "SELECT COUNT(*) AS total FROM topics";
        let total: i64 = sqlx::query(count_query)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", count_query))
            .await
            .map_err(|err| classify(err, "failed to count topics"))?
            .get("total");

        let query = r"
            SELECT t.id, t.name, t.description, t.image, t.category_id, c.name AS category_name
            FROM topics t
            JOIN topic_categories c ON c.id = t.category_id
            ORDER BY t.id
            LIMIT $1 OFFSET $2
        ";
        let rows = sqlx::query(query)
            .bind(i64::from(page.per_page))
            .bind(to_i64(page.offset()))
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| classify(err, "failed to list topics"))?;
        Ok(Page::new(
            rows.iter().map(topic_from_row).collect(),
            page,
            u64::try_from(total).unwrap_or(0),
        ))
    }

    async fn delete_topic(&self, id: i64) -> Result<(), StoreError> {
        let query = "DELETE FROM topics WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| classify(err, "failed to delete topic"))?;
        affected_or_not_found(result.rows_affected())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")?;
        Ok(())
    }
}
