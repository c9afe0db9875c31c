//! Inspect or reset the persisted embedding queue.
//!
//! Usage: `sploot-queue-inspect [status [--json]|clear]`

use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sploot_models::QueueItem;
use sploot_queue::{FileStorage, QueuePersistence, RedisStorage, Storage};
use sploot_worker::QueueConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");
    let json = args.iter().any(|a| a == "--json");
    let config = QueueConfig::from_env();
    let persistence = QueuePersistence::new(open_storage()?, config.storage_key.clone());

    match command {
        "status" => status(&persistence, json).await,
        "clear" => {
            persistence.clear().await?;
            info!(key = persistence.key(), "Cleared persisted queue");
            println!("cleared {}", persistence.key());
            Ok(())
        }
        other => Err(anyhow!("unknown command '{}' (expected status or clear)", other)),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("sploot=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(env_filter)
            .init();
    }
    Ok(())
}

fn open_storage() -> anyhow::Result<Arc<dyn Storage>> {
    match std::env::var("SPLOOT_QUEUE_BACKEND").as_deref() {
        Ok("redis") => Ok(Arc::new(
            RedisStorage::from_env().context("failed to connect to Redis")?,
        )),
        _ => {
            let dir = std::env::var("SPLOOT_QUEUE_DIR").unwrap_or_else(|_| ".sploot".to_string());
            Ok(Arc::new(FileStorage::new(dir)))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport<'a> {
    key: &'a str,
    pending: usize,
    high_priority: usize,
    retrying: usize,
    age_secs: i64,
    items: &'a [QueueItem],
}

async fn status(persistence: &QueuePersistence, json: bool) -> anyhow::Result<()> {
    let Some(snapshot) = persistence.load().await? else {
        println!("{}: empty", persistence.key());
        return Ok(());
    };

    let report = StatusReport {
        key: persistence.key(),
        pending: snapshot.queue.len(),
        high_priority: snapshot.queue.iter().filter(|i| i.is_high_priority()).count(),
        retrying: snapshot.queue.iter().filter(|i| i.retry_count > 0).count(),
        age_secs: snapshot.age(Utc::now()).num_seconds(),
        items: &snapshot.queue,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}: {} pending", report.key, report.pending);
    println!("  saved {}s ago", report.age_secs);
    println!("  high priority: {}", report.high_priority);
    println!("  retrying: {}", report.retrying);

    for item in report.items {
        println!(
            "  {}  priority={} retries={} last_error={}",
            item.asset_id,
            item.priority.as_u8(),
            item.retry_count,
            item.error_type.map(|e| e.as_str()).unwrap_or("-"),
        );
    }
    Ok(())
}
