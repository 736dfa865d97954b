use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use percent_encoding::percent_decode_str;
use teloxide::types::ChatId;
use tokio::process::Command;

use crate::bot::AppState;
use crate::db::Store;
use crate::telegram::Gateway;

pub fn backup_file_name(date: NaiveDate) -> String {
    format!("backup_{}.sql", date.format("%Y-%m-%d"))
}

/// Dump the database and send the file to every admin, in the background.
pub fn spawn_backup(state: &AppState) {
    let job = BackupJob {
        pg_dump_bin: state.config.pg_dump_bin.clone(),
        database_url: state.config.database_url.clone(),
        backup_dir: state.config.backup_dir.clone(),
        timeout: state.config.tool_timeout,
    };
    let gateway = state.gateway.clone();
    let store = state.store.clone();
    let shutdown = state.shutdown.clone();

    state.tasks.spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => tracing::warn!("Backup abandoned on shutdown"),
            result = job.run(gateway, store) => {
                if let Err(e) = result {
                    tracing::error!("Backup failed: {:#}", e);
                }
            }
        }
    });
}

/// libpq environment equivalent to a `postgres://` URL. Handing this to
/// `pg_dump` keeps the password off its argv.
pub fn libpq_env(database_url: &str) -> anyhow::Result<Vec<(&'static str, String)>> {
    let url = url::Url::parse(database_url).context("DATABASE_URL is not a valid URL")?;
    anyhow::ensure!(
        matches!(url.scheme(), "postgres" | "postgresql"),
        "DATABASE_URL has unsupported scheme '{}'",
        url.scheme()
    );

    let decode = |raw: &str| percent_decode_str(raw).decode_utf8_lossy().into_owned();
    let mut env = Vec::new();
    if let Some(host) = url.host_str() {
        env.push(("PGHOST", host.trim_matches(['[', ']']).to_string()));
    }
    if let Some(port) = url.port() {
        env.push(("PGPORT", port.to_string()));
    }
    if !url.username().is_empty() {
        env.push(("PGUSER", decode(url.username())));
    }
    if let Some(password) = url.password() {
        env.push(("PGPASSWORD", decode(password)));
    }
    let database = url.path().trim_start_matches('/');
    if !database.is_empty() {
        env.push(("PGDATABASE", decode(database)));
    }
    for (key, value) in url.query_pairs() {
        if key == "sslmode" {
            env.push(("PGSSLMODE", value.into_owned()));
        }
    }
    Ok(env)
}

struct BackupJob {
    pg_dump_bin: String,
    database_url: String,
    backup_dir: PathBuf,
    timeout: Duration,
}

impl BackupJob {
    async fn run(self, gateway: Arc<dyn Gateway>, store: Arc<dyn Store>) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .with_context(|| format!("creating {}", self.backup_dir.display()))?;

        let dest = self
            .backup_dir
            .join(backup_file_name(chrono::Local::now().date_naive()));
        self.dump(&dest).await?;
        tracing::info!("Backup written to {}", dest.display());

        let admins = store.list_admins().await?;
        for admin in admins {
            match gateway.send_document(ChatId(admin), &dest).await {
                Ok(_) => tracing::info!("Backup sent to admin {}", admin),
                Err(e) => tracing::warn!("Failed to send backup to admin {}: {}", admin, e),
            }
        }
        Ok(())
    }

    async fn dump(&self, dest: &Path) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.pg_dump_bin);
        cmd.envs(libpq_env(&self.database_url)?)
            .arg("-f")
            .arg(dest)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("pg_dump timed out after {:?}", self.timeout))?
            .with_context(|| format!("spawning {}", self.pg_dump_bin))?;

        if !output.status.success() {
            anyhow::bail!(
                "pg_dump exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
