//! Test utilities for database operations.
//!
//! Provides migrated test databases for the punishment tables: an in-memory
//! `SQLite` database that needs no external service, and a `PostgreSQL`
//! database configured through environment variables.

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    Statement,
};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::migrations::Migrator;

/// Tables emptied by [`TestDatabase::cleanup`], children first.
const TABLES: [&str; 2] = ["punishment_log", "punishment"];

/// Test database configuration.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database username.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5433),
            username: std::env::var("TEST_DB_USER").unwrap_or_else(|_| "warden_test".to_string()),
            password: std::env::var("TEST_DB_PASSWORD")
                .unwrap_or_else(|_| "warden_test".to_string()),
            database: std::env::var("TEST_DB_NAME").unwrap_or_else(|_| "warden_test".to_string()),
        }
    }
}

impl TestDbConfig {
    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// A migrated test database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: DatabaseConnection,
}

impl TestDatabase {
    /// Connect to the configured `PostgreSQL` test database and migrate it.
    pub async fn postgres() -> Result<Self, DbErr> {
        let config = TestDbConfig::default();
        let conn = Database::connect(&config.database_url()).await?;
        Migrator::up(&conn, None).await?;

        info!(database = %config.database, "Connected to test database");
        Ok(Self { conn })
    }

    /// Create a private in-memory `SQLite` database and migrate it.
    ///
    /// The pool is pinned to a single connection since every `SQLite` memory
    /// connection opens its own database.
    pub async fn sqlite() -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;
        Migrator::up(&conn, None).await?;

        Ok(Self { conn })
    }

    /// Get the database connection.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Take ownership of the connection, e.g. to share it behind an `Arc`.
    #[must_use]
    pub fn into_connection(self) -> DatabaseConnection {
        self.conn
    }

    /// Delete every punishment and log row.
    pub async fn cleanup(&self) -> Result<(), DbErr> {
        let backend = self.conn.get_database_backend();

        for table in TABLES {
            let sql = match backend {
                DatabaseBackend::Postgres => format!("TRUNCATE TABLE \"{table}\" CASCADE"),
                _ => format!("DELETE FROM {table}"),
            };
            self.conn
                .execute(Statement::from_string(backend, sql))
                .await?;
        }

        info!("Cleaned up test database");
        Ok(())
    }
}
