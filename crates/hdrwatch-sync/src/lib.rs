//! Check cycle orchestration + fixed-interval scheduling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use hdrwatch_adapters::{MediaService, Notifier, NtfyNotifier, RadarrAdapter, SonarrAdapter};
use hdrwatch_core::{filter_unexpected_hdr, FlaggedItem};
use hdrwatch_storage::{format_checkpoint, CheckpointStore, HttpClientConfig, HttpFetcher};
use tracing::{debug, error, info, info_span, Instrument};

mod config;

pub use config::{parse_interval, ConfigError, WatchConfig, DEFAULT_CHECK_INTERVAL};

pub const CRATE_NAME: &str = "hdrwatch-sync";

#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub window_start: DateTime<Utc>,
    pub history_events: usize,
    pub resolved_records: usize,
    pub flagged: Vec<FlaggedItem>,
    pub notified: usize,
}

/// Result of one scheduler iteration: the body's outcome plus the checkpoint advance.
#[derive(Debug)]
pub struct CycleReport {
    pub outcome: Result<CycleSummary>,
    /// Value the checkpoint holds after the cycle, `None` when the write failed.
    pub checkpoint: Option<DateTime<Utc>>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub struct CheckPipeline {
    checkpoint: CheckpointStore,
    services: Vec<Arc<dyn MediaService>>,
    notifier: Arc<dyn Notifier>,
}

impl CheckPipeline {
    pub fn new(
        checkpoint: CheckpointStore,
        services: Vec<Arc<dyn MediaService>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            checkpoint,
            services,
            notifier,
        }
    }

    /// Wires the Radarr, Sonarr and ntfy clients described by `config`.
    pub fn from_config(config: &WatchConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout,
            user_agent: Some(format!("hdrwatch/{}", env!("CARGO_PKG_VERSION"))),
            proxy: config.proxy.clone(),
        })?;

        let radarr = RadarrAdapter::new(config.radarr.clone(), http.clone())
            .context("configuring radarr client")?;
        let sonarr = SonarrAdapter::new(config.sonarr.clone(), http.clone())
            .context("configuring sonarr client")?;
        let notifier = NtfyNotifier::new(http, config.ntfy_url.clone(), config.ntfy_auth.as_deref())
            .context("configuring ntfy notifier")?;

        let services: Vec<Arc<dyn MediaService>> = vec![Arc::new(radarr), Arc::new(sonarr)];
        Ok(Self::new(
            CheckpointStore::new(config.checkpoint_path.clone()),
            services,
            Arc::new(notifier),
        ))
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Runs one cycle inside the error boundary and always advances the checkpoint.
    ///
    /// The checkpoint is rewritten even when the cycle failed before reaching
    /// history, so items imported inside a failed window are not revisited.
    pub async fn run_cycle(&self) -> CycleReport {
        info!("performing check for unexpected HDR media");

        let outcome = self.check_once().await;
        match &outcome {
            Ok(summary) => info!(
                events = summary.history_events,
                flagged = summary.flagged.len(),
                notified = summary.notified,
                "check complete"
            ),
            Err(err) => error!("check failed: {err:#}"),
        }

        let checkpoint = match self.checkpoint.write(Utc::now()).await {
            Ok(ts) => {
                debug!(checkpoint = %format_checkpoint(ts), "checkpoint advanced");
                Some(ts)
            }
            Err(err) => {
                error!(error = %err, "failed to advance checkpoint");
                None
            }
        };

        CycleReport {
            outcome,
            checkpoint,
        }
    }

    /// The cycle body: any error aborts the remainder of this cycle.
    pub async fn check_once(&self) -> Result<CycleSummary> {
        let window_start = self.checkpoint.read().await.context("reading checkpoint")?;
        let span = info_span!("check", since = %format_checkpoint(window_start));

        async {
            let mut history = Vec::with_capacity(self.services.len());
            for service in &self.services {
                let events = service
                    .fetch_history(window_start)
                    .await
                    .with_context(|| format!("fetching {} history", service.kind()))?;
                debug!(service = %service.kind(), events = events.len(), "history fetched");
                history.push(events);
            }
            let history_events: usize = history.iter().map(Vec::len).sum();

            let resolved = try_join_all(self.services.iter().zip(&history).map(
                |(service, events)| async move {
                    service
                        .resolve_details(events)
                        .await
                        .with_context(|| format!("resolving {} details", service.kind()))
                },
            ))
            .await?;
            let resolved_records: usize = resolved.iter().map(Vec::len).sum();

            let flagged: Vec<FlaggedItem> = self
                .services
                .iter()
                .zip(&resolved)
                .flat_map(|(service, records)| {
                    filter_unexpected_hdr(records, service.expected_profile_id())
                })
                .collect();
            info!(count = flagged.len(), "found unexpected HDR items");

            let mut notified = 0usize;
            for item in &flagged {
                info!(service = %item.service, title = %item.title, "found unexpected HDR download");
                self.notifier
                    .notify(item)
                    .await
                    .with_context(|| format!("notifying about {}", item.relative_path))?;
                notified += 1;
            }

            Ok::<_, anyhow::Error>(CycleSummary {
                window_start,
                history_events,
                resolved_records,
                flagged,
                notified,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Runs the pipeline immediately, then again `interval` after each cycle ends.
pub struct CycleScheduler {
    pipeline: CheckPipeline,
    interval: Duration,
    state: SchedulerState,
    cycles: u64,
}

impl CycleScheduler {
    pub fn new(pipeline: CheckPipeline, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            state: SchedulerState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn pipeline(&self) -> &CheckPipeline {
        &self.pipeline
    }

    pub async fn tick(&mut self) -> CycleReport {
        self.state = SchedulerState::Running;
        self.cycles += 1;
        let report = self
            .pipeline
            .run_cycle()
            .instrument(info_span!("cycle", n = self.cycles))
            .await;
        self.state = SchedulerState::Idle;
        report
    }

    /// Runs `limit` cycles (or forever when `None`), sleeping between them.
    pub async fn run(&mut self, limit: Option<u64>) {
        loop {
            self.tick().await;
            if limit.is_some_and(|limit| self.cycles >= limit) {
                return;
            }
            debug!(interval = %humantime::format_duration(self.interval), "sleeping until next check");
            tokio::time::sleep(self.interval).await;
        }
    }

    pub async fn run_forever(mut self) {
        self.run(None).await
    }
}
