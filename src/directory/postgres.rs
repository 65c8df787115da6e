use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::time::Duration;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{DirectoryError, NewUser, User, UserDirectory, UserUpdate};

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at";

/// Directory backed by the `users` table (see `sql/schema.sql`).
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    /// # Errors
    /// Returns an error if the pool cannot connect.
    pub async fn connect(dsn: &str) -> Result<Self, DirectoryError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_user(&self, query: &str, bind: &str) -> Result<Option<User>, DirectoryError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(bind)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn exists(&self, query: &str, bind: &str) -> Result<bool, DirectoryError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(bind)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }
}

fn user_from_row(row: &PgRow) -> Result<User, DirectoryError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn conflict_or(err: sqlx::Error, value: &str) -> DirectoryError {
    if is_unique_violation(&err) {
        DirectoryError::Conflict(value.to_string())
    } else {
        DirectoryError::Database(err)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn exists_by_email(&self, email: &str) -> Result<bool, DirectoryError> {
        self.exists("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)", email)
            .await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, DirectoryError> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM users WHERE lower(username) = lower($1))",
            username,
        )
        .await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        self.fetch_one_user(&query, email).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, DirectoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create(&self, user: NewUser) -> Result<User, DirectoryError> {
        let query = format!(
            "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(user.password_hash.as_deref())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| conflict_or(err, &user.email))?;
        user_from_row(&row)
    }

    async fn update(&self, user: &User, fields: UserUpdate) -> Result<User, DirectoryError> {
        let query = format!(
            "UPDATE users SET username = COALESCE($2, username), \
             password_hash = COALESCE($3, password_hash) WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let conflict_value = fields.username.clone().unwrap_or_default();
        let row = sqlx::query(&query)
            .bind(user.id)
            .bind(fields.username)
            .bind(fields.password_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| conflict_or(err, &conflict_value))?;
        match row {
            Some(row) => user_from_row(&row),
            None => Err(DirectoryError::NotFound(user.id)),
        }
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
