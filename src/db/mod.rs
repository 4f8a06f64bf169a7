//! SQLite persistence for alerts and stats snapshots.
//!
//! Single-file store in WAL mode so readers never block the pipeline's
//! writes. Schema changes go through ordered integer migrations, each
//! applied inside its own transaction; a failed migration rolls back and
//! aborts startup.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::engine::{Alert, Evidence};
use crate::llm::LlmExplanation;

const BASE_SCHEMA_VERSION: i64 = 1;

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    alert_id        TEXT PRIMARY KEY,
    timestamp       REAL NOT NULL,
    rule_name       TEXT NOT NULL,
    severity        TEXT NOT NULL,
    confidence      REAL NOT NULL,
    src_ip          TEXT NOT NULL,
    dst_ip          TEXT NOT NULL,
    description     TEXT NOT NULL,
    evidence        TEXT NOT NULL,
    window_start    REAL NOT NULL,
    window_end      REAL NOT NULL,
    window_size_sec INTEGER NOT NULL,
    created_at      REAL NOT NULL DEFAULT (unixepoch('now', 'subsec'))
);

CREATE TABLE IF NOT EXISTS stats_snapshots (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp        REAL NOT NULL,
    packets_seen     INTEGER NOT NULL,
    packets_dropped  INTEGER NOT NULL,
    flows_active     INTEGER NOT NULL,
    alerts_fired     INTEGER NOT NULL,
    windows_analyzed INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version    INTEGER PRIMARY KEY,
    applied_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_alerts_rule_name ON alerts(rule_name);
CREATE INDEX IF NOT EXISTS idx_alerts_severity  ON alerts(severity);
CREATE INDEX IF NOT EXISTS idx_alerts_src_ip    ON alerts(src_ip)
"#;

/// Ordered migrations applied past the base schema.
const MIGRATIONS: &[(i64, &str)] = &[
    // v2: attach LLM explanations to stored alerts
    (2, "ALTER TABLE alerts ADD COLUMN llm_explanation TEXT DEFAULT NULL"),
];

fn epoch_secs(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

/// One row of the periodic pipeline stats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub timestamp: f64,
    pub packets_seen: u64,
    pub packets_dropped: u64,
    pub flows_active: u64,
    pub alerts_fired: u64,
    pub windows_analyzed: u64,
}

/// Alert row as read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredAlert {
    pub alert_id: String,
    pub timestamp: f64,
    pub rule_name: String,
    pub severity: String,
    pub confidence: f64,
    pub src_ip: String,
    pub dst_ip: String,
    pub description: String,
    pub evidence: Evidence,
    pub window_start: f64,
    pub window_end: f64,
    pub window_size_seconds: i64,
    pub llm_explanation: Option<LlmExplanation>,
}

/// Optional filters for paginated alert queries.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub rule_name: Option<String>,
    pub severity: Option<String>,
    pub src_ip: Option<String>,
    pub since: Option<f64>,
}

impl AlertFilter {
    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(rule_name) = &self.rule_name {
            clauses.push("rule_name = ?");
            params.push(rule_name.clone());
        }
        if let Some(severity) = &self.severity {
            clauses.push("severity = ?");
            params.push(severity.to_uppercase());
        }
        if let Some(src_ip) = &self.src_ip {
            clauses.push("src_ip = ?");
            params.push(src_ip.clone());
        }
        if let Some(since) = self.since {
            clauses.push("timestamp >= ?");
            params.push(since.to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        (where_sql, params)
    }
}

/// Aggregate alert statistics for the read model.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total_alerts: i64,
    pub alerts_last_hour: i64,
    pub alerts_by_severity: HashMap<String, i64>,
    pub alerts_by_rule: HashMap<String, i64>,
    pub top_src_ips: Vec<SourceCount>,
    pub latest_alert_timestamp: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCount {
    pub src_ip: String,
    pub count: i64,
}

/// Handle to the alert store.
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if missing) the store at `path`, apply the base
    /// schema and any pending migrations.
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {parent:?}"))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database {path:?}"))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        storage.apply_migrations().await?;
        info!(path, "database opened");
        Ok(storage)
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .journal_mode(SqliteJournalMode::Memory)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let storage = Self { pool };
        storage.init_schema().await?;
        storage.apply_migrations().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in BASE_SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("schema initialisation failed")?;
        }
        sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(BASE_SCHEMA_VERSION)
            .bind(epoch_secs(&Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Apply every migration newer than the recorded version, each inside
    /// its own transaction. Failure rolls back and aborts startup.
    async fn apply_migrations(&self) -> Result<()> {
        let current: i64 = sqlx::query("SELECT MAX(version) AS v FROM schema_version")
            .fetch_one(&self.pool)
            .await?
            .try_get::<Option<i64>, _>("v")?
            .unwrap_or(0);

        let pending: Vec<_> = MIGRATIONS.iter().filter(|(v, _)| *v > current).collect();
        if pending.is_empty() {
            debug!(version = current, "no pending migrations");
            return Ok(());
        }

        for (version, sql) in pending.into_iter().copied() {
            info!(version, "applying migration");
            let mut tx = self.pool.begin().await?;
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration v{version} failed"))?;
            sqlx::query("INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(epoch_secs(&Utc::now()))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    /// Persist one alert. Idempotent on the primary key: saving the same
    /// alert twice leaves one row.
    pub async fn save_alert(&self, alert: &Alert) -> Result<()> {
        let evidence_json = serde_json::to_string(&alert.evidence)
            .unwrap_or_else(|_| r#"{"error":"non-serializable evidence"}"#.to_string());

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO alerts (
                alert_id, timestamp, rule_name, severity, confidence,
                src_ip, dst_ip, description, evidence,
                window_start, window_end, window_size_sec
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.alert_id)
        .bind(epoch_secs(&alert.timestamp))
        .bind(&alert.rule_name)
        .bind(alert.severity.as_str())
        .bind(alert.confidence)
        .bind(&alert.src_ip)
        .bind(&alert.dst_ip)
        .bind(&alert.description)
        .bind(evidence_json)
        .bind(epoch_secs(&alert.window_start))
        .bind(epoch_secs(&alert.window_end))
        .bind(alert.window_size_seconds as i64)
        .execute(&self.pool)
        .await
        .context("save_alert failed")?;
        Ok(())
    }

    /// Attach an LLM explanation to an existing alert row.
    pub async fn update_alert_llm(
        &self,
        alert_id: &str,
        explanation: &LlmExplanation,
    ) -> Result<()> {
        let llm_json = serde_json::to_string(explanation)?;
        sqlx::query("UPDATE alerts SET llm_explanation = ? WHERE alert_id = ?")
            .bind(llm_json)
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .context("update_alert_llm failed")?;
        Ok(())
    }

    /// Insert a stats row, then prune the table down to the `max_rows`
    /// newest entries so it never grows without bound.
    pub async fn save_stats_snapshot(&self, snapshot: &StatsSnapshot, max_rows: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stats_snapshots (
                timestamp, packets_seen, packets_dropped,
                flows_active, alerts_fired, windows_analyzed
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.timestamp)
        .bind(snapshot.packets_seen as i64)
        .bind(snapshot.packets_dropped as i64)
        .bind(snapshot.flows_active as i64)
        .bind(snapshot.alerts_fired as i64)
        .bind(snapshot.windows_analyzed as i64)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM stats_snapshots
            WHERE id NOT IN (
                SELECT id FROM stats_snapshots
                ORDER BY timestamp DESC
                LIMIT ?
            )
            "#,
        )
        .bind(max_rows as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Paginated alert query, newest first. `limit` is capped at 500.
    pub async fn get_alerts(
        &self,
        filter: &AlertFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredAlert>> {
        let (where_sql, params) = filter.where_clause();
        let sql = format!(
            "SELECT * FROM alerts {where_sql} ORDER BY timestamp DESC LIMIT ? OFFSET ?"
        );

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query
            .bind(limit.min(500) as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::row_to_alert).collect())
    }

    pub async fn get_alert_by_id(&self, alert_id: &str) -> Result<Option<StoredAlert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE alert_id = ?")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_alert))
    }

    pub async fn get_alert_count(&self, filter: &AlertFilter) -> Result<i64> {
        let (where_sql, params) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) AS n FROM alerts {where_sql}");
        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param);
        }
        Ok(query.fetch_one(&self.pool).await?.try_get("n")?)
    }

    /// Aggregate summary: totals, last hour, per-severity, per-rule, and
    /// the ten noisiest sources.
    pub async fn get_stats_summary(&self) -> Result<StatsSummary> {
        let one_hour_ago = epoch_secs(&Utc::now()) - 3600.0;

        let total_alerts: i64 = sqlx::query("SELECT COUNT(*) AS n FROM alerts")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;

        let alerts_last_hour: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM alerts WHERE timestamp >= ?")
                .bind(one_hour_ago)
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;

        let mut alerts_by_severity = HashMap::new();
        for row in sqlx::query("SELECT severity, COUNT(*) AS n FROM alerts GROUP BY severity")
            .fetch_all(&self.pool)
            .await?
        {
            alerts_by_severity.insert(row.try_get("severity")?, row.try_get("n")?);
        }

        let mut alerts_by_rule = HashMap::new();
        for row in sqlx::query("SELECT rule_name, COUNT(*) AS n FROM alerts GROUP BY rule_name")
            .fetch_all(&self.pool)
            .await?
        {
            alerts_by_rule.insert(row.try_get("rule_name")?, row.try_get("n")?);
        }

        let top_src_ips = sqlx::query(
            "SELECT src_ip, COUNT(*) AS n FROM alerts GROUP BY src_ip ORDER BY n DESC LIMIT 10",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(SourceCount {
                src_ip: row.try_get("src_ip")?,
                count: row.try_get("n")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let latest_alert_timestamp: Option<f64> =
            sqlx::query("SELECT MAX(timestamp) AS t FROM alerts")
                .fetch_one(&self.pool)
                .await?
                .try_get("t")?;

        Ok(StatsSummary {
            total_alerts,
            alerts_last_hour,
            alerts_by_severity,
            alerts_by_rule,
            top_src_ips,
            latest_alert_timestamp,
        })
    }

    /// Most recent stats snapshots, newest first. `limit` is capped at
    /// 1000.
    pub async fn get_recent_stats_snapshots(&self, limit: u32) -> Result<Vec<StatsSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, packets_seen, packets_dropped,
                   flows_active, alerts_fired, windows_analyzed
            FROM stats_snapshots
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit.min(1000) as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StatsSnapshot {
                timestamp: row.get("timestamp"),
                packets_seen: row.get::<i64, _>("packets_seen") as u64,
                packets_dropped: row.get::<i64, _>("packets_dropped") as u64,
                flows_active: row.get::<i64, _>("flows_active") as u64,
                alerts_fired: row.get::<i64, _>("alerts_fired") as u64,
                windows_analyzed: row.get::<i64, _>("windows_analyzed") as u64,
            })
            .collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("database closed");
    }

    fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> StoredAlert {
        let evidence: Evidence = row
            .try_get::<String, _>("evidence")
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        let llm_explanation: Option<LlmExplanation> = row
            .try_get::<Option<String>, _>("llm_explanation")
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok());

        StoredAlert {
            alert_id: row.get("alert_id"),
            timestamp: row.get("timestamp"),
            rule_name: row.get("rule_name"),
            severity: row.get("severity"),
            confidence: row.get("confidence"),
            src_ip: row.get("src_ip"),
            dst_ip: row.get("dst_ip"),
            description: row.get("description"),
            evidence,
            window_start: row.get("window_start"),
            window_end: row.get("window_end"),
            window_size_seconds: row.get("window_size_sec"),
            llm_explanation,
        }
    }
}
