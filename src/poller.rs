//! Advisory, baseline capture, then a bounded wait for the next report.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;

use crate::config::Config;
use crate::cwa::ReportFetcher;
use crate::discord::Notifier;
use crate::lock::FileLock;
use crate::models::EarthquakeReport;
use crate::store::LastSeenStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new report was sent and its id stored.
    Reported(i64),
    /// Every attempt saw the already-known report.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self { max_attempts: 30, wait: Duration::from_secs(30) }
    }
}

/// State shared with other runs through the filesystem.
#[derive(Debug, Clone)]
pub struct PollerState {
    pub store: LastSeenStore,
    pub loop_lock: PathBuf,
}

pub struct Poller {
    fetcher: ReportFetcher,
    notifier: Notifier,
    state: PollerState,
    settings: PollerSettings,
    city: String,
}

impl Poller {
    pub fn new(
        fetcher: ReportFetcher,
        notifier: Notifier,
        state: PollerState,
        settings: PollerSettings,
        city: impl Into<String>,
    ) -> Self {
        Self { fetcher, notifier, state, settings, city: city.into() }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        std::fs::create_dir_all(&cfg.state_dir)
            .with_context(|| format!("create state dir {}", cfg.state_dir.display()))?;
        let client = crate::util::http_client(cfg.http_timeout)?;
        let fetcher = ReportFetcher::new(client.clone(), cfg.api_url.clone(), cfg.api_key.clone());
        let notifier = Notifier::new(client, cfg.webhook_urls.clone(), cfg.image_path());
        let state = PollerState {
            store: LastSeenStore::new(cfg.last_id_path(), cfg.file_lock_path()),
            loop_lock: cfg.loop_lock_path(),
        };
        let settings = PollerSettings { max_attempts: cfg.wait_attempts, wait: cfg.wait_interval };
        Ok(Self::new(fetcher, notifier, state, settings, cfg.city.clone()))
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        self.notifier
            .send_alert(&self.city)
            .await
            .context("advisory not accepted; check DISCORD_WEBHOOK_URL")?;
        self.capture_baseline().await?;
        self.poll().await
    }

    /// Records the newest upstream id so that only later reports are sent.
    pub async fn capture_baseline(&self) -> Result<Option<i64>> {
        match self.fetcher.fetch_latest().await {
            Ok(Some(report)) => {
                if self.state.store.read() != Some(report.id) && !self.state.store.write(report.id) {
                    tracing::warn!("baseline {} not persisted; previous id still applies", report.id);
                }
                tracing::info!("baseline report id {}", report.id);
                Ok(Some(report.id))
            }
            Ok(None) => {
                tracing::warn!("no baseline report available; comparing against stored id {:?}", self.state.store.read());
                Ok(None)
            }
            Err(e) => {
                let hint = if e.is_configuration() { "check EARTHQUAKE_API" } else { "upstream unavailable" };
                Err(e).context(format!("baseline fetch failed ({})", hint))
            }
        }
    }

    async fn poll(&self) -> Result<RunOutcome> {
        let max = self.settings.max_attempts;
        for attempt in 1..=max {
            match self.fetcher.fetch_latest().await {
                Ok(Some(report)) if self.state.store.read() == Some(report.id) => {
                    tracing::info!(
                        "report not yet published (attempt {}/{}), retrying in {:?}",
                        attempt, max, self.settings.wait
                    );
                }
                Ok(Some(report)) => {
                    if let Some(id) = self.claim_and_dispatch(&report).await? {
                        return Ok(RunOutcome::Reported(id));
                    }
                }
                Ok(None) => {
                    tracing::warn!("attempt {}/{}: no usable report in response", attempt, max);
                }
                Err(e) => {
                    tracing::warn!("attempt {}/{}: {}; counting as not yet published", attempt, max, e);
                }
            }
            if attempt < max {
                sleep(self.settings.wait).await;
            }
        }
        tracing::error!("no new report after {} attempts; nothing sent", max);
        Ok(RunOutcome::Exhausted)
    }

    /// Sends `report` unless another run already did. The loop lock is held
    /// from the re-read of the stored id until the new id is written.
    async fn claim_and_dispatch(&self, report: &EarthquakeReport) -> Result<Option<i64>> {
        let loop_lock = self.state.loop_lock.clone();
        let _guard = tokio::task::spawn_blocking(move || FileLock::acquire(&loop_lock))
            .await
            .context("lock task failed")?
            .with_context(|| format!("acquire {}", self.state.loop_lock.display()))?;

        if self.state.store.read() == Some(report.id) {
            tracing::info!("report {} already sent by another run", report.id);
            return Ok(None);
        }

        tracing::info!("new report {} detected; notifying {} webhook(s)", report.id, self.notifier.targets());
        let deliveries = self.notifier.send_report(report).await;
        let delivered = deliveries.iter().filter(|d| d.is_ok()).count();
        if delivered == 0 {
            anyhow::bail!("report {} rejected by all {} webhook(s)", report.id, deliveries.len());
        }
        tracing::info!("report {} delivered to {}/{} webhook(s)", report.id, delivered, deliveries.len());

        if !self.state.store.write(report.id) {
            tracing::warn!("report {} sent but not persisted; a later run may send it again", report.id);
        }
        Ok(Some(report.id))
    }
}
