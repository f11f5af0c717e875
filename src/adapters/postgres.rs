//! PostgreSQL adapter: mirrors [`super::mysql::MySqlAdapter`]'s shape,
//! swapping the pool and the `pg_dump`/`psql` client binaries.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use std::time::Duration;

use super::DatabaseAdapter;
use crate::error::{AdapterError, AdapterResult};

const SYSTEM_DATABASES: &[&str] = &["postgres", "template0", "template1"];
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(3600);

pub struct PostgresAdapter {
    pool: Pool<Postgres>,
    host: String,
    port: u16,
    username: String,
}

impl PostgresAdapter {
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> AdapterResult<Self> {
        let url = format!("postgres://{username}:{password}@{host}:{port}/postgres");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_before_acquire(true)
            .connect(&url)
            .await
            .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            pool,
            host: host.to_string(),
            port,
            username: username.to_string(),
        })
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    async fn databases(&self) -> AdapterResult<Vec<String>> {
        let rows = sqlx::query("SELECT datname FROM pg_database WHERE datistemplate = false")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AdapterError::EnumerationFailed(e.to_string()))?;

        let names = rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .collect();

        Ok(names)
    }

    async fn test_connection(&self) -> AdapterResult<bool> {
        Ok(sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok())
    }

    async fn backup_database(
        &self,
        name: &str,
        out_path: &std::path::Path,
    ) -> AdapterResult<bool> {
        let file = tokio::fs::File::create(out_path)
            .await
            .map_err(|e| AdapterError::DumpFailed(e.to_string()))?
            .into_std()
            .await;

        let status = tokio::process::Command::new("pg_dump")
            .args([
                "-h",
                &self.host,
                "-p",
                &self.port.to_string(),
                "-U",
                &self.username,
                name,
            ])
            .stdout(file)
            .status()
            .await
            .map_err(|e| AdapterError::DumpFailed(e.to_string()))?;

        Ok(status.success())
    }

    async fn restore_database(
        &self,
        name: &str,
        in_path: &std::path::Path,
    ) -> AdapterResult<bool> {
        let file = tokio::fs::File::open(in_path)
            .await
            .map_err(|e| AdapterError::RestoreFailed(e.to_string()))?
            .into_std()
            .await;

        let status = tokio::process::Command::new("psql")
            .args([
                "-h",
                &self.host,
                "-p",
                &self.port.to_string(),
                "-U",
                &self.username,
                "-d",
                name,
            ])
            .stdin(file)
            .status()
            .await
            .map_err(|e| AdapterError::RestoreFailed(e.to_string()))?;

        Ok(status.success())
    }

    fn backup_command(&self, name: &str, out_path: &std::path::Path) -> String {
        format!(
            "pg_dump -h {} -p {} -U {} {} > {}",
            self.host,
            self.port,
            self.username,
            name,
            out_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_command_is_loggable_text() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://backup_svc@db.internal:5432/postgres")
            .unwrap();
        let adapter = PostgresAdapter {
            pool,
            host: "db.internal".to_string(),
            port: 5432,
            username: "backup_svc".to_string(),
        };
        let command = adapter.backup_command("orders", std::path::Path::new("/tmp/orders.sql"));
        assert!(command.starts_with("pg_dump"));
        assert!(command.contains("orders"));
    }
}
