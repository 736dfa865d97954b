pub mod models;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Query contract the bot needs from persistent storage.
#[async_trait]
pub trait Store: Send + Sync {
    async fn is_admin(&self, chat_id: i64) -> anyhow::Result<bool>;

    /// Register a user; repeated calls keep the original join date.
    async fn add_user(&self, chat_id: i64, username: Option<&str>) -> anyhow::Result<()>;
    async fn list_users(&self) -> anyhow::Result<Vec<models::User>>;

    async fn add_admin(&self, chat_id: i64) -> anyhow::Result<()>;
    /// Returns `false` when the id was not an admin.
    async fn remove_admin(&self, chat_id: i64) -> anyhow::Result<bool>;
    async fn list_admins(&self) -> anyhow::Result<Vec<i64>>;

    async fn add_allowed_channel(&self, name: &str) -> anyhow::Result<()>;
    /// Returns `false` when the channel was already gone.
    async fn remove_allowed_channel(&self, name: &str) -> anyhow::Result<bool>;
    async fn list_allowed_channels(&self) -> anyhow::Result<Vec<String>>;

    async fn count_users_total(&self) -> anyhow::Result<i64>;
    async fn count_users_today(&self) -> anyhow::Result<i64>;
    async fn count_users_last_month(&self) -> anyhow::Result<i64>;
}

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        // Each CREATE must be a separate query (Postgres doesn't allow
        // multiple commands in a single prepared statement).

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY,
                username TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS admins (
                id BIGINT PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS allowed_channels (
                name TEXT PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_created ON users(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert the configured bootstrap admins, leaving existing rows alone.
    pub async fn seed_admins(&self, admin_ids: &[i64]) -> anyhow::Result<()> {
        for id in admin_ids {
            self.add_admin(*id).await?;
        }
        Ok(())
    }

    async fn count(&self, sql: &str) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(row.0)
    }
}

#[async_trait]
impl Store for Database {
    // ── Users ──────────────────────────────────────────────────────

    async fn add_user(&self, chat_id: i64, username: Option<&str>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET username = COALESCE($2, users.username)
            "#,
        )
        .bind(chat_id)
        .bind(username)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<models::User>> {
        let users = sqlx::query_as::<_, models::User>("SELECT * FROM users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn count_users_total(&self) -> anyhow::Result<i64> {
        self.count("SELECT COUNT(*) FROM users").await
    }

    async fn count_users_today(&self) -> anyhow::Result<i64> {
        self.count("SELECT COUNT(*) FROM users WHERE created_at >= date_trunc('day', NOW())")
            .await
    }

    async fn count_users_last_month(&self) -> anyhow::Result<i64> {
        self.count("SELECT COUNT(*) FROM users WHERE created_at >= NOW() - INTERVAL '1 month'")
            .await
    }

    // ── Admins ─────────────────────────────────────────────────────

    async fn is_admin(&self, chat_id: i64) -> anyhow::Result<bool> {
        let row: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM admins WHERE id = $1)")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn add_admin(&self, chat_id: i64) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO admins (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_admin(&self, chat_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM admins WHERE id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_admins(&self) -> anyhow::Result<Vec<i64>> {
        let admins = sqlx::query_as::<_, models::Admin>("SELECT * FROM admins")
            .fetch_all(&self.pool)
            .await?;
        Ok(admins.into_iter().map(|a| a.id).collect())
    }

    // ── Allowed channels ───────────────────────────────────────────

    async fn add_allowed_channel(&self, name: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO allowed_channels (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_allowed_channel(&self, name: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM allowed_channels WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_allowed_channels(&self) -> anyhow::Result<Vec<String>> {
        let channels = sqlx::query_as::<_, models::AllowedChannel>(
            "SELECT * FROM allowed_channels ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(channels.into_iter().map(|c| c.name).collect())
    }
}
