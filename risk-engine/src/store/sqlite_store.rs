use std::path::Path;
use std::str::FromStr;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::{debug, info};

use common::{CorrelationEntry, Period, PriceBar, RiskError, RiskMetricsRecord, RiskResult};
use super::RiskStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS price_bar (
    symbol TEXT NOT NULL,
    date   TEXT NOT NULL,
    open   TEXT NOT NULL,
    high   TEXT NOT NULL,
    low    TEXT NOT NULL,
    close  TEXT NOT NULL,
    volume INTEGER NOT NULL,
    PRIMARY KEY (symbol, date)
);

CREATE TABLE IF NOT EXISTS risk_metrics (
    symbol         TEXT NOT NULL,
    period         TEXT NOT NULL,
    computed_at_us INTEGER NOT NULL,
    risk_level     TEXT NOT NULL,
    record         TEXT NOT NULL,
    PRIMARY KEY (symbol, period, computed_at_us)
);

CREATE TABLE IF NOT EXISTS correlation (
    symbol_a       TEXT NOT NULL,
    symbol_b       TEXT NOT NULL,
    correlation    REAL NOT NULL,
    computed_at_us INTEGER NOT NULL,
    PRIMARY KEY (symbol_a, symbol_b)
);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite 持久化存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: String,
}

fn db_err(e: rusqlite::Error) -> RiskError {
    RiskError::StoreUnavailable(e.to_string())
}

fn decode_err(msg: String) -> RiskError {
    RiskError::StoreUnavailable(format!("corrupt row: {msg}"))
}

fn from_micros(us: i64) -> RiskResult<DateTime<Utc>> {
    Utc.timestamp_micros(us)
        .single()
        .ok_or_else(|| decode_err(format!("invalid timestamp {us}")))
}

impl SqliteStore {
    /// 打开（或创建）数据库文件并初始化表结构
    pub fn open<P: AsRef<Path>>(path: P) -> RiskResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RiskError::StoreUnavailable(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn, path.display().to_string())
    }

    pub fn open_in_memory() -> RiskResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, ":memory:".to_string())
    }

    fn init(conn: Connection, location: String) -> RiskResult<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        info!("SQLite store ready at {}", location);
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

impl RiskStore for SqliteStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    fn price_bars(&self, symbol: &str, since: NaiveDate) -> RiskResult<Vec<PriceBar>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT date, open, high, low, close, volume
                 FROM price_bar
                 WHERE symbol = ?1 AND date >= ?2
                 ORDER BY date ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![symbol, since.format(DATE_FORMAT).to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let decimal = |s: &str| Decimal::from_str(s).map_err(|e| decode_err(e.to_string()));
        rows.into_iter()
            .map(|(date, open, high, low, close, volume)| {
                Ok(PriceBar {
                    symbol: symbol.to_string(),
                    date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                        .map_err(|e| decode_err(e.to_string()))?,
                    open: decimal(&open)?,
                    high: decimal(&high)?,
                    low: decimal(&low)?,
                    close: decimal(&close)?,
                    volume: volume.max(0) as u64,
                })
            })
            .collect()
    }

    fn append_price_bars(&self, symbol: &str, bars: &[PriceBar]) -> RiskResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let mut inserted = 0;
        {
            // 主键冲突直接忽略，重复追加是幂等的
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO price_bar (symbol, date, open, high, low, close, volume)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(db_err)?;
            for bar in bars {
                inserted += stmt
                    .execute(params![
                        symbol,
                        bar.date.format(DATE_FORMAT).to_string(),
                        bar.open.to_string(),
                        bar.high.to_string(),
                        bar.low.to_string(),
                        bar.close.to_string(),
                        bar.volume.min(i64::MAX as u64) as i64,
                    ])
                    .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        debug!("Appended {}/{} bars for {}", inserted, bars.len(), symbol);
        Ok(inserted)
    }

    fn insert_metrics(&self, record: &RiskMetricsRecord) -> RiskResult<()> {
        let payload = serde_json::to_string(record)
            .map_err(|e| RiskError::StoreUnavailable(e.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO risk_metrics (symbol, period, computed_at_us, risk_level, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.symbol,
                record.period.as_str(),
                record.computed_at.timestamp_micros(),
                record.risk_level.as_str(),
                payload,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn latest_metrics(
        &self,
        symbol: &str,
        period: Period,
        not_before: DateTime<Utc>,
    ) -> RiskResult<Option<RiskMetricsRecord>> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT record FROM risk_metrics
                 WHERE symbol = ?1 AND period = ?2 AND computed_at_us >= ?3
                 ORDER BY computed_at_us DESC
                 LIMIT 1",
                params![symbol, period.as_str(), not_before.timestamp_micros()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(|e| decode_err(e.to_string())))
            .transpose()
    }

    fn upsert_correlation(&self, entry: &CorrelationEntry) -> RiskResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO correlation (symbol_a, symbol_b, correlation, computed_at_us)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(symbol_a, symbol_b) DO UPDATE SET
                correlation = excluded.correlation,
                computed_at_us = excluded.computed_at_us",
            params![
                entry.symbol_a,
                entry.symbol_b,
                entry.correlation,
                entry.computed_at.timestamp_micros(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn correlation(&self, a: &str, b: &str) -> RiskResult<Option<CorrelationEntry>> {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        let conn = self.conn.lock();
        let row: Option<(f64, i64)> = conn
            .query_row(
                "SELECT correlation, computed_at_us FROM correlation
                 WHERE symbol_a = ?1 AND symbol_b = ?2",
                params![a, b],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        row.map(|(correlation, us)| {
            Ok(CorrelationEntry::new(a, b, correlation, from_micros(us)?))
        })
        .transpose()
    }
}
