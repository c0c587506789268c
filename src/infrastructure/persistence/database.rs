//! Durable-store schema (§9.8), grounded on the teacher's
//! `infrastructure::persistence::database::Database` (WAL journal mode,
//! idempotent `CREATE TABLE IF NOT EXISTS`). Decimal columns are stored as
//! `TEXT` for exact round-tripping; timestamps as `INTEGER` unix seconds.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent).await.context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!("connected to database: {db_url}");
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                portfolio_id TEXT NOT NULL,
                investor_profile TEXT NOT NULL,
                start_date INTEGER NOT NULL,
                end_date INTEGER NOT NULL,
                initial_capital TEXT NOT NULL,
                current_equity TEXT NOT NULL,
                status TEXT NOT NULL,
                risk_config_json TEXT NOT NULL,
                selection_config_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create campaigns table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaign_risk_state (
                campaign_id TEXT PRIMARY KEY,
                current_equity TEXT NOT NULL,
                equity_high_watermark TEXT NOT NULL,
                daily_pnl TEXT NOT NULL,
                daily_loss_pct TEXT NOT NULL,
                current_dd_pct TEXT NOT NULL,
                state_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create campaign_risk_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaign_positions (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                atr_at_entry TEXT NOT NULL,
                risk_amount TEXT NOT NULL,
                state TEXT NOT NULL,
                close_reason TEXT,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_positions_campaign ON campaign_positions (campaign_id, state);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create campaign_positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaign_orders (
                id TEXT PRIMARY KEY,
                internal_order_id TEXT NOT NULL UNIQUE,
                campaign_id TEXT NOT NULL,
                position_id TEXT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT,
                stop_price TEXT,
                oco_group_id TEXT,
                status TEXT NOT NULL,
                cancel_reason TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_oco_group ON campaign_orders (oco_group_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create campaign_orders table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                period TEXT NOT NULL,
                bar_ts INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                trade_count INTEGER NOT NULL,
                vwap TEXT NOT NULL,
                PRIMARY KEY (symbol, period, bar_ts)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create bars table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_configs (
                id TEXT PRIMARY KEY,
                portfolio_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                config_json TEXT NOT NULL,
                UNIQUE (portfolio_id, symbol)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create signal_configs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                portfolio_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                signal_json TEXT NOT NULL,
                generated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_signals_pending ON signals (portfolio_id, symbol, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS circuit_breaker_events (
                id TEXT PRIMARY KEY,
                portfolio_id TEXT NOT NULL,
                breaker_level TEXT NOT NULL,
                event_type TEXT NOT NULL,
                symbol TEXT,
                cluster TEXT,
                reason TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                ts INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create circuit_breaker_events table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS staleness_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange TEXT NOT NULL,
                symbol TEXT,
                feed TEXT,
                staleness_seconds INTEGER NOT NULL,
                severity TEXT NOT NULL,
                action_taken TEXT NOT NULL,
                ts INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create staleness_log table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vre_decision_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                regime TEXT NOT NULL,
                decision_json TEXT NOT NULL,
                decision_hash TEXT NOT NULL,
                ts INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create vre_decision_log table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_trail (
                id TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL UNIQUE,
                category TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                hash TEXT NOT NULL,
                ts INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create audit_trail table")?;

        info!("database schema initialized");
        Ok(())
    }
}
