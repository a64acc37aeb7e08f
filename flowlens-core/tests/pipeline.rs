//! End-to-end runs of the orchestrator against in-memory collaborators.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use common::{RecordingNotifier, VecSource, at, record, records_every};
use flowlens_core::config::EnrichmentConfig;
use flowlens_core::warehouse::SqliteWarehouse;
use flowlens_core::{
    FetchError, MemoryStateStore, MemoryWarehouse, Pipeline, PipelineError, PipelineState,
    RunRequest, RunState, Stage, StageOutcome, Summarizer,
};
use flowlens_models::ApiKey;
use flowlens_models::providers::{ChatRequest, ChatResponse, ModelProvider, StopReason, Usage};

struct FixedProvider {
    reply: Option<&'static str>,
}

#[async_trait]
impl ModelProvider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn chat(&self, _request: ChatRequest) -> flowlens_models::Result<ChatResponse> {
        match self.reply {
            Some(reply) => Ok(ChatResponse {
                content: reply.to_string(),
                stop_reason: StopReason::EndTurn,
                usage: Usage::new(100, 20),
            }),
            None => Err(flowlens_models::Error::ProviderApi {
                status: 503,
                message: "model overloaded".to_string(),
            }),
        }
    }
}

fn summarizer(reply: Option<&'static str>) -> Summarizer {
    Summarizer::new(
        Arc::new(FixedProvider { reply }),
        &EnrichmentConfig::new(ApiKey::new("sk-test")),
    )
}

#[tokio::test]
async fn adjacent_windows_process_each_record_once() {
    // 11:00, 11:10, ... 14:50
    let source = Arc::new(VecSource::new(records_every(at(11, 0), 10, 24), 4));
    let warehouse = Arc::new(MemoryWarehouse::new());
    let state = Arc::new(MemoryStateStore::new(RunState::at(at(11, 0))));
    let pipeline = Pipeline::new(source, warehouse.clone(), state.clone());

    let first = pipeline.run(RunRequest::at(at(12, 0))).await.unwrap();
    let second = pipeline.run(RunRequest::at(at(13, 0))).await.unwrap();

    assert_eq!(first.window.unwrap().end(), second.window.unwrap().start());
    // The 12:00 record belongs to the second window only.
    assert_eq!(first.records_fetched, 6);
    assert_eq!(second.records_fetched, 6);
    assert_eq!(first.rows_written + second.rows_written, 12);
    assert_eq!(warehouse.len(), 12);
    assert_eq!(state.snapshot().last_window_end, Some(at(13, 0)));
}

#[tokio::test]
async fn rerunning_a_window_is_idempotent() {
    let source = Arc::new(VecSource::new(records_every(at(9, 0), 5, 12), 5));
    let warehouse = Arc::new(SqliteWarehouse::open_in_memory("attributions".to_string()).unwrap());
    let state = Arc::new(MemoryStateStore::default());
    let pipeline = Pipeline::new(source, warehouse.clone(), state.clone());
    let request = RunRequest {
        start: Some(at(9, 0)),
        end: Some(at(10, 0)),
        ..RunRequest::at(at(12, 0))
    };

    pipeline.run(request.clone()).await.unwrap();
    let rows_after_first = warehouse.row_count().unwrap();
    let values_after_first = warehouse.values().unwrap();
    let report = pipeline.run(request).await.unwrap();

    assert_eq!(rows_after_first, 12);
    assert_eq!(warehouse.row_count().unwrap(), rows_after_first);
    assert_eq!(warehouse.values().unwrap(), values_after_first);
    assert!(!report.state_advanced);
    assert_eq!(state.snapshot().last_window_end, Some(at(10, 0)));
}

#[tokio::test]
async fn storage_error_leaves_run_state_unchanged() {
    let source = Arc::new(VecSource::new(records_every(at(11, 0), 10, 6), 10));
    let notifier = Arc::new(RecordingNotifier::default());
    let state = Arc::new(MemoryStateStore::new(RunState::at(at(11, 0))));
    let pipeline = Pipeline::new(
        source,
        Arc::new(MemoryWarehouse::failing("quota exceeded")),
        state.clone(),
    )
    .with_notifier(notifier.clone());

    let err = pipeline.run(RunRequest::at(at(12, 0))).await.unwrap_err();

    assert!(matches!(err, PipelineError::Storage(_)));
    assert_eq!(err.kind(), "StorageError");
    assert_eq!(state.snapshot(), RunState::at(at(11, 0)));
    assert_eq!(state.save_count(), 0);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn notifier_failure_does_not_fail_the_run() {
    let source = Arc::new(VecSource::new(records_every(at(11, 0), 10, 6), 10));
    let warehouse = Arc::new(MemoryWarehouse::new());
    let state = Arc::new(MemoryStateStore::new(RunState::at(at(11, 0))));
    let pipeline = Pipeline::new(source, warehouse.clone(), state.clone())
        .with_notifier(Arc::new(RecordingNotifier::failing()));

    let report = pipeline.run(RunRequest::at(at(12, 0))).await.unwrap();

    assert!(report.notification_failed());
    assert!(matches!(
        report.outcome(Stage::Notifying),
        Some(StageOutcome::Degraded(reason)) if reason.contains("chat not found")
    ));
    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(warehouse.len(), 6);
    assert_eq!(state.snapshot().last_window_end, Some(at(12, 0)));
}

#[tokio::test]
async fn empty_window_succeeds_silently_and_advances() {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = Arc::new(MemoryStateStore::new(RunState::at(at(11, 0))));
    let pipeline = Pipeline::new(
        Arc::new(VecSource::new(Vec::new(), 10)),
        Arc::new(MemoryWarehouse::new()),
        state.clone(),
    )
    .with_summarizer(summarizer(Some("unused")))
    .with_notifier(notifier.clone());

    let report = pipeline.run(RunRequest::at(at(12, 0))).await.unwrap();

    assert_eq!(report.records_fetched, 0);
    assert_eq!(report.rows_written, 0);
    assert_eq!(report.outcome(Stage::Enriching), Some(&StageOutcome::Skipped));
    assert_eq!(report.outcome(Stage::Notifying), Some(&StageOutcome::Skipped));
    assert!(notifier.messages().is_empty());
    assert!(report.state_advanced);
    assert_eq!(state.snapshot().last_window_end, Some(at(12, 0)));
}

#[tokio::test]
async fn empty_window_posts_no_data_message_when_configured() {
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(
        Arc::new(VecSource::new(Vec::new(), 10)),
        Arc::new(MemoryWarehouse::new()),
        Arc::new(MemoryStateStore::new(RunState::at(at(11, 0)))),
    )
    .with_notifier(notifier.clone())
    .notify_on_empty(true);

    pipeline.run(RunRequest::at(at(12, 0))).await.unwrap();

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].text.contains("No attribution activity"));
    assert_eq!(messages[0].channel_id, "@test-channel");
}

#[tokio::test]
async fn enrichment_failure_degrades_but_persists_and_notifies() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = Arc::new(MemoryStateStore::new(RunState::at(at(11, 0))));
    let pipeline = Pipeline::new(
        Arc::new(VecSource::new(records_every(at(11, 0), 10, 6), 10)),
        warehouse.clone(),
        state.clone(),
    )
    .with_summarizer(summarizer(None))
    .with_notifier(notifier.clone());

    let report = pipeline.run(RunRequest::at(at(12, 0))).await.unwrap();

    assert!(matches!(
        report.outcome(Stage::Enriching),
        Some(StageOutcome::Degraded(_))
    ));
    assert!(report.summary.is_none());
    assert_eq!(warehouse.len(), 6);
    assert_eq!(notifier.messages().len(), 1);
    assert_eq!(state.snapshot().last_window_end, Some(at(12, 0)));
}

#[tokio::test]
async fn summary_is_appended_to_the_notification() {
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(
        Arc::new(VecSource::new(records_every(at(11, 0), 10, 3), 10)),
        Arc::new(MemoryWarehouse::new()),
        Arc::new(MemoryStateStore::new(RunState::at(at(11, 0)))),
    )
    .with_summarizer(summarizer(Some("Net outflow from Binance.")))
    .with_notifier(notifier.clone());

    let report = pipeline.run(RunRequest::at(at(12, 0))).await.unwrap();

    assert_eq!(report.summary.as_deref(), Some("Net outflow from Binance."));
    let messages = notifier.messages();
    assert!(messages[0].text.contains("*Records:* 3"));
    assert!(messages[0].text.ends_with("Net outflow from Binance.\n"));
    assert_eq!(
        messages[0].correlation_id.as_deref(),
        Some("w-20240301T110000Z-20240301T120000Z")
    );
}

#[tokio::test]
async fn auth_error_is_fatal_and_keeps_state() {
    let state = Arc::new(MemoryStateStore::new(RunState::at(at(11, 0))));
    let warehouse = Arc::new(MemoryWarehouse::new());
    let pipeline = Pipeline::new(
        Arc::new(VecSource::failing(|| FetchError::from_status(401, "invalid key"))),
        warehouse.clone(),
        state.clone(),
    );

    let err = pipeline.run(RunRequest::at(at(12, 0))).await.unwrap_err();

    assert_eq!(err.kind(), "AuthError");
    assert!(warehouse.is_empty());
    assert_eq!(state.save_count(), 0);
}

#[tokio::test]
async fn caught_up_state_is_a_no_op() {
    let source = Arc::new(VecSource::new(vec![record("a", at(12, 0), 3.0)], 10));
    let state = Arc::new(MemoryStateStore::new(RunState::at(at(12, 0))));
    let pipeline = Pipeline::new(source.clone(), Arc::new(MemoryWarehouse::new()), state.clone());

    let report = pipeline
        .run(RunRequest::at(at(12, 0) + Duration::seconds(40)))
        .await
        .unwrap();

    assert!(report.window.is_none());
    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(source.calls(), 0);
    assert_eq!(state.save_count(), 0);
}

#[tokio::test]
async fn dry_run_does_not_advance_state() {
    let state = Arc::new(MemoryStateStore::new(RunState::at(at(11, 0))));
    let pipeline = Pipeline::new(
        Arc::new(VecSource::new(records_every(at(11, 0), 10, 6), 10)),
        Arc::new(MemoryWarehouse::new()),
        state.clone(),
    );

    let report = pipeline
        .run(RunRequest {
            dry_run: true,
            ..RunRequest::at(at(12, 0))
        })
        .await
        .unwrap();

    assert_eq!(report.rows_written, 6);
    assert!(!report.state_advanced);
    assert_eq!(state.snapshot(), RunState::at(at(11, 0)));
}

#[test]
fn from_config_builds_every_stage() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    let state_path_str = state_path.to_string_lossy().into_owned();
    let env = move |key: &str| -> Option<String> {
        match key {
            "GBQ_URI" => Some("sqlite::memory:".to_string()),
            "ELEMENTUS_API_KEY" => Some("el-test".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "TELEGRAM_TOKEN" => Some("123:abc".to_string()),
            "TELEGRAM_CHANNEL_ID" => Some("@flows".to_string()),
            "FLOWLENS_STATE_PATH" => Some(state_path_str.clone()),
            _ => None,
        }
    };
    let config = flowlens_core::Config::resolve(&flowlens_core::Settings::default(), env).unwrap();

    assert!(Pipeline::from_config(&config, false).is_ok());
    assert!(Pipeline::from_config(&config, true).is_ok());
}
