use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use billsync_core::BillsyncClient;

use crate::sync::backoff::Backoff;
use crate::sync::engine::{SyncEngine, SyncStatus};
use crate::sync::store::{SyncStore, default_db_path};

const DEFAULT_DRAIN_SECS: u64 = 15;
const DEFAULT_PROBE_SECS: u64 = 5;
const DEFAULT_STATUS_SECS: u64 = 2;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_url: String,
    pub api_token: String,
    pub db_path: PathBuf,
    pub drain_interval: Duration,
    pub probe_interval: Duration,
    pub status_interval: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub enable_probe: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_url = std::env::var("BILLSYNC_API_URL").context("BILLSYNC_API_URL is not set")?;
        let api_token =
            std::env::var("BILLSYNC_API_TOKEN").context("BILLSYNC_API_TOKEN is not set")?;
        let db_path = match std::env::var("BILLSYNC_DB_PATH") {
            Ok(value) => PathBuf::from(value),
            Err(_) => default_db_path().context("data directory is unavailable")?,
        };
        let drain_interval =
            Duration::from_secs(read_u64_env("BILLSYNC_DRAIN_SECS", DEFAULT_DRAIN_SECS));
        let probe_interval =
            Duration::from_secs(read_u64_env("BILLSYNC_PROBE_SECS", DEFAULT_PROBE_SECS));
        let status_interval =
            Duration::from_secs(read_u64_env("BILLSYNC_STATUS_SECS", DEFAULT_STATUS_SECS));
        let base_delay =
            Duration::from_millis(read_u64_env("BILLSYNC_BASE_DELAY_MS", DEFAULT_BASE_DELAY_MS));
        let max_delay =
            Duration::from_millis(read_u64_env("BILLSYNC_MAX_DELAY_MS", DEFAULT_MAX_DELAY_MS));
        let enable_probe = read_bool_env("BILLSYNC_ENABLE_PROBE", true);

        Ok(Self {
            api_url,
            api_token,
            db_path,
            drain_interval,
            probe_interval,
            status_interval,
            base_delay,
            max_delay,
            enable_probe,
        })
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
    client: BillsyncClient,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let client = BillsyncClient::with_base_url(&config.api_url, config.api_token.clone())
            .context("invalid api url")?;
        let store = SyncStore::new_at(&config.db_path)
            .await
            .with_context(|| format!("failed to open sync store at {:?}", config.db_path))?;
        let engine = Arc::new(
            SyncEngine::new(client.clone(), store)
                .with_backoff(Backoff::new(config.base_delay, config.max_delay, false)),
        );

        Ok(Self {
            config,
            engine,
            client,
        })
    }

    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        eprintln!(
            "[billsyncd] started: api={}, db={}, drain_interval={:?}",
            self.config.api_url,
            self.config.db_path.display(),
            self.config.drain_interval
        );

        // Until the first probe answers, assume offline rather than burning
        // retry budget against an unreachable backend.
        let online = Arc::new(AtomicBool::new(!self.config.enable_probe));

        let probe_handle = if self.config.enable_probe {
            let probe_client = self.client.clone();
            let probe_interval = self.config.probe_interval;
            let online_probe = Arc::clone(&online);
            Some(tokio::spawn(async move {
                let mut known = false;
                loop {
                    let available = probe_client.health().await.is_ok();
                    if available != known {
                        if available {
                            eprintln!("[billsyncd] backend reachable, resuming sync");
                        } else {
                            eprintln!("[billsyncd] backend unreachable, pausing sync");
                        }
                        known = available;
                    }
                    online_probe.store(available, Ordering::SeqCst);
                    tokio::time::sleep(probe_interval).await;
                }
            }))
        } else {
            None
        };

        let engine_for_worker = Arc::clone(&self.engine);
        let drain_interval = self.config.drain_interval;
        let online_worker = Arc::clone(&online);
        let worker_handle = tokio::spawn(async move {
            loop {
                if online_worker.load(Ordering::SeqCst) {
                    match engine_for_worker.process_queue().await {
                        Ok(summary) if summary.attempted > 0 => {
                            eprintln!(
                                "[billsyncd] drain pass: attempted={}, applied={}, failed={}",
                                summary.attempted, summary.applied, summary.failed
                            );
                        }
                        Ok(_) => {}
                        Err(err) => {
                            eprintln!("[billsyncd] drain error: {err}");
                        }
                    }
                }
                tokio::time::sleep(drain_interval).await;
            }
        });

        let engine_for_status = Arc::clone(&self.engine);
        let status_interval = self.config.status_interval;
        let status_handle = tokio::spawn(async move {
            let mut known: Option<SyncStatus> = None;
            loop {
                match engine_for_status.status().await {
                    Ok(status) => {
                        if status_changed(known.as_ref(), &status) {
                            eprintln!(
                                "[billsyncd] queue status: pending={}, dormant={}",
                                status.pending, status.dormant
                            );
                            known = Some(status);
                        }
                    }
                    Err(err) => {
                        eprintln!("[billsyncd] status error: {err}");
                    }
                }
                tokio::time::sleep(status_interval).await;
            }
        });

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        eprintln!("[billsyncd] shutting down");

        if let Some(handle) = probe_handle {
            handle.abort();
        }
        worker_handle.abort();
        status_handle.abort();

        Ok(())
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
