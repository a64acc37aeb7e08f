//! Pipeline orchestrator.
//!
//! One run moves through `Idle -> Fetching -> Enriching -> Persisting ->
//! Notifying -> Done`. Fetch and persist failures are fatal and end in
//! `Failed(stage)` with the run state untouched. Enrichment and notification
//! are best-effort: their failures are recorded as
//! [`StageOutcome::Degraded`] and the run carries on. The run state is
//! advanced to the window end only after every stage has run.

mod plan;
mod report;

use std::sync::Arc;

use tracing::{error, info, warn};

pub use plan::{RunRequest, plan_window};
pub use report::{PipelineState, RunReport, Stage, StageOutcome};

use crate::attribution::{AttributionClient, AttributionSource, RecordPages};
use crate::config::{Config, WindowPolicy};
use crate::enrichment::Summarizer;
use crate::error::PipelineError;
use crate::notify::{
    ConsoleNotifier, NotificationMessage, Notifier, TelegramNotifier, render_empty, render_report,
};
use crate::record::AttributionRecord;
use crate::state::{FileStateStore, StateStore};
use crate::warehouse::{self, MemoryWarehouse, Warehouse};
use crate::window::QueryWindow;

/// Wires the stages together. Build with [`Pipeline::new`] or
/// [`Pipeline::from_config`].
pub struct Pipeline {
    source: Arc<dyn AttributionSource>,
    summarizer: Option<Summarizer>,
    warehouse: Arc<dyn Warehouse>,
    notifier: Option<Arc<dyn Notifier>>,
    state_store: Arc<dyn StateStore>,
    window_policy: WindowPolicy,
    notify_on_empty: bool,
}

impl Pipeline {
    /// Pipeline with enrichment and notification disabled.
    pub fn new(
        source: Arc<dyn AttributionSource>,
        warehouse: Arc<dyn Warehouse>,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            source,
            summarizer: None,
            warehouse,
            notifier: None,
            state_store,
            window_policy: WindowPolicy::default(),
            notify_on_empty: false,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_window_policy(mut self, policy: WindowPolicy) -> Self {
        self.window_policy = policy;
        self
    }

    /// Send a "no activity" message for empty windows.
    pub fn notify_on_empty(mut self, enabled: bool) -> Self {
        self.notify_on_empty = enabled;
        self
    }

    /// Build the production pipeline.
    ///
    /// With `dry_run` the warehouse is in memory and messages are printed
    /// instead of posted.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self, PipelineError> {
        let warehouse: Arc<dyn Warehouse> = if dry_run {
            Arc::new(MemoryWarehouse::new())
        } else {
            Arc::from(warehouse::open(&config.warehouse)?)
        };

        let mut pipeline = Self::new(
            Arc::new(AttributionClient::new(&config.attribution)?),
            warehouse,
            Arc::new(FileStateStore::new(config.state_path.clone())),
        )
        .with_window_policy(config.window);

        if let Some(enrichment) = &config.enrichment {
            pipeline = pipeline.with_summarizer(Summarizer::openai(enrichment)?);
        }
        if let Some(settings) = &config.notifier {
            let notifier: Arc<dyn Notifier> = if dry_run {
                Arc::new(ConsoleNotifier::new(settings.channel_id.clone()))
            } else {
                Arc::new(TelegramNotifier::new(settings)?)
            };
            pipeline = pipeline
                .with_notifier(notifier)
                .notify_on_empty(settings.notify_on_empty);
        }
        Ok(pipeline)
    }

    /// Execute one run.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, PipelineError> {
        let mut run_state = self.state_store.load()?;
        let Some(window) = plan_window(&run_state, &request, &self.window_policy)? else {
            info!(
                last_window_end = ?run_state.last_window_end,
                "run state is already at the requested end, nothing to do"
            );
            let mut report = RunReport::new(None);
            report.state = PipelineState::Done;
            return Ok(report);
        };

        let correlation_id = window.correlation_id();
        info!(
            %window,
            %correlation_id,
            span_minutes = window.duration().num_minutes(),
            dry_run = request.dry_run,
            "starting run"
        );
        let mut report = RunReport::new(Some(window));

        // Fetching
        report.state = PipelineState::Running(Stage::Fetching);
        let records = match RecordPages::new(self.source.as_ref(), window).collect_all().await {
            Ok(records) => records,
            Err(e) => {
                error!(
                    %correlation_id,
                    state = ?PipelineState::Failed(Stage::Fetching),
                    kind = e.kind(),
                    error = %e,
                    "fetch failed"
                );
                return Err(e.into());
            }
        };
        report.records_fetched = records.len();
        report.record(Stage::Fetching, StageOutcome::Completed);
        info!(%correlation_id, records = records.len(), "fetch complete");

        // Enriching
        report.state = PipelineState::Running(Stage::Enriching);
        let (outcome, summary) = self.enrich(&records, &correlation_id).await;
        report.record(Stage::Enriching, outcome);
        report.summary = summary;

        // Persisting
        report.state = PipelineState::Running(Stage::Persisting);
        report.rows_written = match self.warehouse.upsert(&records).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(
                    %correlation_id,
                    state = ?PipelineState::Failed(Stage::Persisting),
                    warehouse = self.warehouse.name(),
                    error = %e,
                    "persist failed, run state left unchanged"
                );
                return Err(e.into());
            }
        };
        report.record(Stage::Persisting, StageOutcome::Completed);
        info!(
            %correlation_id,
            warehouse = self.warehouse.name(),
            rows = report.rows_written,
            "persist complete"
        );

        // Notifying
        report.state = PipelineState::Running(Stage::Notifying);
        let outcome = self
            .notify(&window, &records, report.summary.as_deref(), &correlation_id)
            .await;
        report.record(Stage::Notifying, outcome);

        if request.dry_run {
            info!(%correlation_id, "dry run, run state not advanced");
        } else if run_state.advance_to(window.end(), request.now) {
            self.state_store.save(&run_state)?;
            report.state_advanced = true;
            info!(
                %correlation_id,
                last_window_end = %window.end(),
                store = %self.state_store.describe(),
                "run state advanced"
            );
        } else {
            info!(%correlation_id, "window ends before stored cursor, run state unchanged");
        }

        report.state = PipelineState::Done;
        Ok(report)
    }

    async fn enrich(
        &self,
        records: &[AttributionRecord],
        correlation_id: &str,
    ) -> (StageOutcome, Option<String>) {
        let Some(summarizer) = &self.summarizer else {
            return (StageOutcome::Skipped, None);
        };
        if records.is_empty() {
            return (StageOutcome::Skipped, None);
        }
        match summarizer.summarize(records).await {
            Ok(summary) if summary.is_empty() => (StageOutcome::Completed, None),
            Ok(summary) => (StageOutcome::Completed, Some(summary)),
            Err(e) => {
                warn!(%correlation_id, error = %e, "enrichment failed, continuing without summary");
                (StageOutcome::Degraded(e.to_string()), None)
            }
        }
    }

    async fn notify(
        &self,
        window: &QueryWindow,
        records: &[AttributionRecord],
        summary: Option<&str>,
        correlation_id: &str,
    ) -> StageOutcome {
        let Some(notifier) = &self.notifier else {
            return StageOutcome::Skipped;
        };
        let text = if records.is_empty() {
            if !self.notify_on_empty {
                return StageOutcome::Skipped;
            }
            render_empty(window)
        } else {
            render_report(window, records, summary)
        };

        let message =
            NotificationMessage::new(text, notifier.channel()).with_correlation_id(correlation_id);
        match notifier.send(&message).await {
            Ok(()) => StageOutcome::Completed,
            Err(e) => {
                warn!(
                    %correlation_id,
                    channel = notifier.channel(),
                    error = %e,
                    "notification failed"
                );
                StageOutcome::Degraded(e.to_string())
            }
        }
    }
}
