//! Realtime monitor
//!
//! Connects to a CaseHub hub, joins the groups given on the command line and
//! prints lifecycle events and cache invalidations until Ctrl+C.
//!
//! ```bash
//! CASEHUB_URL=https://api.example.org \
//! CASEHUB_TOKEN=eyJ... \
//! CASEHUB_ROLE=admin \
//! CASEHUB_PLATFORM=android \
//! RUST_LOG=casehub=debug \
//! cargo run --example monitor -- case-42 region-north
//! ```
//!
//! Set `CASEHUB_CONFIG` to a YAML file to override hub paths, profiles or routes.

use anyhow::{Context, Result};
use casehub::prelude::*;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("casehub=info")),
        )
        .init();

    let config = match std::env::var("CASEHUB_CONFIG") {
        Ok(path) => RealtimeConfig::from_yaml_file(&path)
            .with_context(|| format!("loading {}", path))?,
        Err(_) => RealtimeConfig::new(
            std::env::var("CASEHUB_URL").context("CASEHUB_URL or CASEHUB_CONFIG must be set")?,
        ),
    };
    let platform = std::env::var("CASEHUB_PLATFORM").unwrap_or_else(|_| "android".to_string());
    let token = std::env::var("CASEHUB_TOKEN").ok();
    let role = std::env::var("CASEHUB_ROLE").ok();

    println!("📡 CaseHub Realtime Monitor");
    println!("===========================\n");

    let cache = InMemoryQueryCache::new();
    let connection = RealtimeConnection::builder(config, &platform)
        .with_token_provider(StaticTokenProvider::new(token.as_deref(), role.as_deref()))
        .with_cache(cache.clone())
        .build()?;

    let profile = connection.profile();
    println!("✅ Platform: {}", profile.platform);
    println!("   - connect timeout: {}ms", profile.connect_timeout_ms);
    println!("   - keep-alive:      {}ms", profile.keep_alive_interval_ms);
    println!("   - retry schedule:  {:?}\n", profile.retry_delay_schedule);

    let mut events = connection.subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            match serde_json::to_string(&envelope.event) {
                Ok(json) => println!("🔔 {}", json),
                Err(e) => eprintln!("⚠️  unprintable event: {}", e),
            }
        }
    });

    if let Err(e) = connection.start_connection().await {
        eprintln!("⚠️  Initial connection failed: {} ({})", e, e.error_code());
    }

    for group in std::env::args().skip(1) {
        if connection.join_group(&group).await {
            println!("👥 Joined {}", group);
        } else {
            println!("⚠️  Could not join {}", group);
        }
    }

    let supervisor = ConnectionSupervisor::new(connection.clone());
    supervisor.start();

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for key in cache.invalidated() {
                    if cache.mark_fresh(&key) {
                        println!("♻️  invalidated {}", key);
                    }
                }
                let status = supervisor.status();
                if status.disabled {
                    println!("⛔ disabled after {} failures; press Ctrl+C to exit", status.failures);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n👋 Shutting down");
                break;
            }
        }
    }

    supervisor.stop();
    connection.stop_connection().await;
    Ok(())
}
