use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::EngineConfig;
use risk_engine::market_data::CsvQuoteSource;
use risk_engine::service::{Dispatcher, RiskService};
use risk_engine::store::{MemoryStore, RiskStore, SqliteStore};

const DEFAULT_CONFIG: &str = "config/risk-engine.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // stdout 只用于 JSON-RPC 响应，日志写 stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = EngineConfig::load_or_default(&config_path)?;

    info!("Starting Risk Engine with config {:?}", config_path);

    let store = open_store(&config.store.path);
    let quotes = Arc::new(CsvQuoteSource::new(
        config.quote_source.data_dir.clone(),
        config.quote_source.benchmark_symbol.clone(),
    ));
    let service = Arc::new(RiskService::new(store, quotes, &config));
    let dispatcher = Arc::new(Dispatcher::new(service)?);

    info!("Serving JSON-RPC on stdin/stdout, methods: {:?}", dispatcher.methods());
    serve(dispatcher).await
}

/// 打开SQLite存储，失败时退回内存存储
fn open_store(path: &str) -> Arc<dyn RiskStore> {
    let opened = if path == ":memory:" {
        SqliteStore::open_in_memory()
    } else {
        SqliteStore::open(path)
    };

    match opened {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Failed to open store at {}: {}, using in-memory store (degraded mode)", path, e);
            Arc::new(MemoryStore::new())
        }
    }
}

/// 逐行读取请求，每个请求独立任务处理，响应经由单一写任务输出
async fn serve(dispatcher: Arc<Dispatcher>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if let Err(e) = written.await {
                error!("Failed to write response: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request from stdin")? {
        let dispatcher = dispatcher.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let Some(response) = dispatcher.handle_line(&line).await else {
                return;
            };
            match serde_json::to_string(&response) {
                Ok(json) => {
                    if tx.send(json).is_err() {
                        warn!("Response writer closed, dropping response");
                    }
                }
                Err(e) => error!("Failed to serialize response: {}", e),
            }
        });
    }

    info!("stdin closed, draining in-flight requests");
    drop(tx);
    writer.await.context("Response writer task panicked")?;

    info!("Risk Engine stopped");
    Ok(())
}
